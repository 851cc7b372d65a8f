#![no_std]
#![no_main]

mod i2c_task;

use core::panic::PanicInfo;
use i2c_task::{ImuTask, RegisterFile};

use hal::{
    Mcu,
    cortex_m::{self, asm},
    cortex_m_rt::entry,
    fugit::RateExtU32,
    i2c::{I2cInit, Mode},
    nvic_scb::{NvicInit, PriorityGrouping, ScbInit},
    pac,
    pac::Interrupt,
};

#[global_allocator]
static HEAP: hal::Heap<1024> = hal::Heap::new();

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    let dp = pac::Peripherals::take().unwrap();

    // Clock tree and the open-drain AF pins (PB6/PB7, PB10/PB11) belong to
    // the startup code; only the resulting APB1 frequency crosses into the
    // driver, for bit-rate math.
    let pclk = 8_000_000.Hz();

    let mut mcu = Mcu::new(cp.SCB.init(), cp.NVIC.init());
    mcu.scb.set_priority_grouping(PriorityGrouping::Group4);
    mcu.nvic.set_priority(Interrupt::I2C1_EV, 1, false);
    mcu.nvic.set_priority(Interrupt::I2C1_ER, 1, false);
    mcu.nvic.set_priority(Interrupt::I2C2_EV, 2, false);
    mcu.nvic.set_priority(Interrupt::I2C2_ER, 2, false);

    // Master on I2C1, polling an MPU-6050 ----------------------------

    let (master, mut it, mut it_err) = dp
        .I2C1
        .init()
        .into_interrupt_master(Mode::standard(100_000.Hz()), pclk);
    its::I2C1_EV_CB.set(&mut mcu, move || it.handler());
    its::I2C1_ER_CB.set(&mut mcu, move || it_err.handler());

    // Slave on I2C2: a register file other masters can poke ----------

    let (_slave, mut sit, mut sit_err) = dp.I2C2.init().into_interrupt_slave(
        0x37,
        RegisterFile::new(),
        Mode::standard(100_000.Hz()),
        pclk,
    );
    its::I2C2_EV_CB.set(&mut mcu, move || sit.handler());
    its::I2C2_ER_CB.set(&mut mcu, move || sit_err.handler());

    let mut imu = ImuTask::new(master);
    loop {
        imu.poll();
        asm::nop();
    }
}

mod its {
    use hal::interrupt_handler;
    interrupt_handler!(
        (I2C1_EV, I2C1_EV_CB),
        (I2C1_ER, I2C1_ER_CB),
        (I2C2_EV, I2C2_EV_CB),
        (I2C2_ER, I2C2_ER_CB),
    );
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    asm::bkpt();
    loop {}
}
