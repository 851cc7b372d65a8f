mod i2c1;
mod i2c2;

pub use crate::common::i2c::*;

use crate::Steal;
use fugit::HertzU32;

pub trait I2cInit<T> {
    /// Wrap the raw peripheral. The bus clock and the open-drain pins must
    /// already be set up by the startup code; only the resulting APB
    /// frequency crosses into this crate, for bit-rate math.
    fn init(self) -> I2c<T>;
}

/// Register-level configuration on top of the portable contracts.
pub trait I2cConfig: I2cPeriph + I2cSlavePeriph + Steal {
    fn config(&mut self, mode: &Mode, pclk: HertzU32);
}

// wrapper
pub struct I2c<I> {
    i2c: I,
}

impl<I: I2cConfig> I2c<I> {
    /// Split into a master handle plus the handlers for the event and
    /// error vectors; wire those through `interrupt_handler!`.
    pub fn into_interrupt_master(
        mut self,
        mode: Mode,
        pclk: HertzU32,
    ) -> (
        I2cMaster<I>,
        MasterInterruptHandler<I, Transfer>,
        MasterErrorHandler<I, Transfer>,
    ) {
        self.i2c.config(&mode, pclk);
        let i2c2 = unsafe { self.i2c.steal() };
        let i2c3 = unsafe { self.i2c.steal() };
        I2cMaster::new([self.i2c, i2c2, i2c3])
    }

    /// Split into a slave handle answering `addr` with `handler`'s
    /// callbacks, plus the two interrupt handlers.
    pub fn into_interrupt_slave<H>(
        mut self,
        addr: u8,
        handler: H,
        mode: Mode,
        pclk: HertzU32,
    ) -> (
        I2cSlave<I, H>,
        SlaveInterruptHandler<I, H>,
        SlaveErrorHandler<I, H>,
    )
    where
        H: SlaveHandler,
    {
        self.i2c.config(&mode, pclk);
        let i2c2 = unsafe { self.i2c.steal() };
        let i2c3 = unsafe { self.i2c.steal() };
        I2cSlave::new([self.i2c, i2c2, i2c3], addr, handler)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum DutyCycle {
    Ratio2to1,
    Ratio16to9,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Mode {
    Standard {
        frequency: HertzU32,
    },
    Fast {
        frequency: HertzU32,
        duty_cycle: DutyCycle,
    },
}

impl Mode {
    pub fn standard(frequency: HertzU32) -> Self {
        Mode::Standard { frequency }
    }

    pub fn fast(frequency: HertzU32, duty_cycle: DutyCycle) -> Self {
        Mode::Fast {
            frequency,
            duty_cycle,
        }
    }

    pub fn get_frequency(&self) -> HertzU32 {
        match *self {
            Mode::Standard { frequency } => frequency,
            Mode::Fast { frequency, .. } => frequency,
        }
    }
}

impl From<HertzU32> for Mode {
    fn from(frequency: HertzU32) -> Self {
        if frequency.to_Hz() <= 100_000 {
            Self::Standard { frequency }
        } else {
            Self::Fast {
                frequency,
                duty_cycle: DutyCycle::Ratio2to1,
            }
        }
    }
}
