use hal::common::i2c::{I2cMaster, I2cPeriph, SlaveHandler};

// For MPU-6050
const REG_CONFIG: u8 = 0x1A;
const REG_TEMPERATURE: u8 = 0x41;
const REG_POWER_1: u8 = 0x6B;
const REG_WHO_AM_I: u8 = 0x75;
const MPU_ADDR: u8 = 0x68;

pub struct ImuTask<I2C: I2cPeriph> {
    dev: I2cMaster<I2C>,
    buf: [u8; 8],
    step: u8,
}

impl<I2C: I2cPeriph> ImuTask<I2C> {
    pub fn new(dev: I2cMaster<I2C>) -> Self {
        Self {
            dev,
            buf: [0; 8],
            step: 0,
        }
    }

    pub fn poll(&mut self) {
        if self.step == 0 {
            // Wake the part; a missing sensor just leaves step at 0.
            if self.dev.write_register(MPU_ADDR, REG_POWER_1, &[0])
                && self.dev.write_register(MPU_ADDR, REG_CONFIG, &[0x03])
            {
                self.step = 1;
            }
        } else {
            self.dev
                .read_register(MPU_ADDR, REG_WHO_AM_I, &mut self.buf[..1]);
            self.dev
                .read_register(MPU_ADDR, REG_TEMPERATURE, &mut self.buf[1..3]);
        }
    }
}

/// Register file exposed to a remote master: the first written byte
/// selects a register, reads auto-increment from there.
pub struct RegisterFile {
    regs: [u8; 16],
    at: usize,
    selected: bool,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            regs: [0; 16],
            at: 0,
            selected: false,
        }
    }
}

impl SlaveHandler for RegisterFile {
    fn message_from_master(&mut self) {
        self.selected = false;
    }

    fn message_to_master(&mut self) {}

    fn byte_from_master(&mut self, byte: u8) -> bool {
        if !self.selected {
            self.at = (byte as usize) % self.regs.len();
            self.selected = true;
        } else {
            self.regs[self.at] = byte;
            self.at = (self.at + 1) % self.regs.len();
        }
        // Message length is the master's call; the STOP ends it.
        false
    }

    fn byte_to_master(&mut self) -> (u8, bool) {
        let byte = self.regs[self.at];
        self.at = (self.at + 1) % self.regs.len();
        (byte, self.at == 0)
    }
}
