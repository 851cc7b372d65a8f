type I2cX = pac::I2C1;

// $sync begin

use super::*;
use crate::fugit::HertzU32;
use crate::pac;

// Initialization -------------------------------------------------------------

impl I2cInit<I2cX> for I2cX {
    fn init(self) -> I2c<I2cX> {
        I2c { i2c: self }
    }
}

impl I2cConfig for I2cX {
    fn config(&mut self, mode: &Mode, pclk: HertzU32) {
        let clock = pclk.to_Hz();
        let clc_mhz = clock / 1_000_000;

        self.cr1().modify(|_, w| w.pe().clear_bit());

        // Configure bus frequency into I2C peripheral
        self.cr2()
            .write(|w| unsafe { w.freq().bits(clc_mhz as u8) });

        let trise = match mode {
            Mode::Standard { .. } => clc_mhz + 1,
            Mode::Fast { .. } => clc_mhz * 300 / 1000 + 1,
        };

        // Configure correct rise times
        self.trise().write(|w| w.trise().set(trise as u8));

        match mode {
            // I2C clock control calculation
            Mode::Standard { frequency } => {
                let ccr = (clock / (frequency.raw() * 2)).max(4);

                // Set clock to standard mode with appropriate parameters for selected speed
                self.ccr().write(|w| unsafe {
                    w.f_s().clear_bit();
                    w.duty().clear_bit();
                    w.ccr().bits(ccr as u16)
                });
            }
            Mode::Fast {
                frequency,
                duty_cycle,
            } => match duty_cycle {
                DutyCycle::Ratio2to1 => {
                    let ccr = (clock / (frequency.raw() * 3)).max(1);

                    // Set clock to fast mode with appropriate parameters for selected speed (2:1 duty cycle)
                    self.ccr().write(|w| unsafe {
                        w.f_s().set_bit().duty().clear_bit().ccr().bits(ccr as u16)
                    });
                }
                DutyCycle::Ratio16to9 => {
                    let ccr = (clock / (frequency.raw() * 25)).max(1);

                    // Set clock to fast mode with appropriate parameters for selected speed (16:9 duty cycle)
                    self.ccr().write(|w| unsafe {
                        w.f_s().set_bit().duty().set_bit().ccr().bits(ccr as u16)
                    });
                }
            },
        }

        // Enable the I2C processing
        // Disable acknowledge at next position
        self.cr1().modify(|_, w| w.pe().set_bit().pos().clear_bit());
    }
}

// Master primitives ----------------------------------------------------------

impl I2cPeriph for I2cX {
    #[inline]
    fn it_send_start(&mut self) {
        self.cr2().modify(|_, w| w.itevten().set_bit());
        // Clear all pending error bits
        // NOTE(unsafe): Writing 0 clears the r/w bits and has no effect on the r bits
        self.sr1().write(|w| unsafe { w.bits(0) });
        self.cr1().modify(|_, w| w.start().set_bit());
        self.cr2().modify(|_, w| w.iterren().set_bit().itbufen().set_bit());
    }

    #[inline]
    fn send_restart(&mut self) {
        // A pending ADDR would keep SB from ever rising again.
        clear_addr(self);
        self.cr1().modify(|_, w| w.start().set_bit());
    }

    #[inline]
    fn send_stop(&mut self) {
        self.cr1()
            .modify(|_, w| w.stop().set_bit().ack().clear_bit());
        // Clear all pending error bits
        self.sr1().write(|w| unsafe { w.bits(0) });
    }

    fn write_data(&mut self, data: u8) {
        // The SR1 read clears SB after a start; a completed address phase
        // additionally needs the SR2 read before DR is written.
        clear_addr(self);
        self.dr().write(|w| unsafe { w.dr().bits(data) });
    }

    fn receive_enable(&mut self) {
        // Entering the read data phase; the acknowledge bit stays under
        // the engine's explicit control.
        clear_addr(self);
        self.cr2().modify(|_, w| w.itbufen().set_bit());
    }

    #[inline]
    fn set_ack(&mut self, ack: bool) {
        self.cr1().modify(|_, w| w.ack().bit(ack));
    }

    #[inline]
    fn read_data(&self) -> u8 {
        self.dr().read().bits() as u8
    }

    #[inline]
    fn nack_received(&mut self) -> bool {
        self.sr1().read().af().bit_is_set()
    }

    #[inline]
    fn disable_all_interrupt(&mut self) {
        self.cr2().modify(|_, w| {
            w.itbufen()
                .clear_bit()
                .iterren()
                .clear_bit()
                .itevten()
                .clear_bit()
        });
    }

    fn get_and_clean_error(&mut self) -> Option<Error> {
        collect_error(self)
    }
}

// Slave primitives -----------------------------------------------------------

impl I2cSlavePeriph for I2cX {
    fn slave_enable(&mut self, addr: u8) {
        // NOTE(unsafe): 7-bit mode keeps bit 0 and the upper half zero
        self.oar1().write(|w| unsafe { w.bits((addr as u32) << 1) });
        self.cr1().modify(|_, w| w.pe().set_bit().ack().set_bit());
        self.cr2().modify(|_, w| {
            w.itevten()
                .set_bit()
                .itbufen()
                .set_bit()
                .iterren()
                .set_bit()
        });
    }

    fn slave_disable(&mut self) {
        self.cr1().modify(|_, w| w.ack().clear_bit());
        self.cr2().modify(|_, w| {
            w.itbufen()
                .clear_bit()
                .iterren()
                .clear_bit()
                .itevten()
                .clear_bit()
        });
    }

    fn slave_event(&mut self) -> Option<SlaveEvent> {
        let sr1 = self.sr1().read();
        if sr1.addr().bit_is_set() {
            // TRA lives in SR2; reading it completes the ADDR-clear
            // sequence, which is also what ends the address-phase stretch.
            let dir = if self.sr2().read().tra().bit_is_set() {
                Direction::MasterRead
            } else {
                Direction::MasterWrite
            };
            Some(SlaveEvent::Address(dir))
        } else if sr1.rx_ne().bit_is_set() {
            Some(SlaveEvent::Received)
        } else if sr1.stopf().bit_is_set() {
            // STOPF clears by the SR1 read followed by a CR1 write.
            self.cr1().modify(|_, w| w.pe().set_bit());
            Some(SlaveEvent::Stopped)
        } else if sr1.tx_e().bit_is_set() {
            Some(SlaveEvent::Requested)
        } else if sr1.af().bit_is_set() {
            // The master refused the last byte we sent: this is the bus
            // cycle after the final transmitted byte.
            self.sr1().write(|w| w.af().clear_bit());
            Some(SlaveEvent::Cycle)
        } else {
            None
        }
    }

    fn write_data(&mut self, data: u8) {
        self.dr().write(|w| unsafe { w.dr().bits(data) });
    }

    #[inline]
    fn read_data(&self) -> u8 {
        self.dr().read().bits() as u8
    }

    fn release_clock(&mut self) {
        // ADDR is what stretches the clock on this part; data-phase
        // stretching already ended when DR was touched.
        clear_addr(self);
    }

    fn get_and_clean_error(&mut self) -> Option<Error> {
        collect_error(self)
    }
}

fn clear_addr(i2c: &I2cX) {
    let sr1 = i2c.sr1().read();
    if sr1.addr().bit_is_set() {
        let _ = i2c.sr2().read();
    }
}

fn collect_error(i2c: &I2cX) -> Option<Error> {
    let sr1 = i2c.sr1().read();
    if sr1.arlo().bit_is_set() {
        i2c.sr1().write(|w| w.arlo().clear_bit());
        Some(Error::ArbitrationLoss)
    } else if sr1.af().bit_is_set() {
        i2c.sr1().write(|w| w.af().clear_bit());
        Some(Error::NoAcknowledge(NoAcknowledgeSource::Unknown))
    } else if sr1.ovr().bit_is_set() {
        i2c.sr1().write(|w| w.ovr().clear_bit());
        Some(Error::Overrun)
    } else {
        // The errata indicates that BERR may be incorrectly detected. It recommends ignoring and
        // clearing the BERR bit instead.
        if sr1.berr().bit_is_set() {
            i2c.sr1().write(|w| w.berr().clear_bit());
        }
        None
    }
}

// $sync end
