//! Interrupt-driven I2C core.
//!
//! One bus primitive is executed per completion interrupt. The master side
//! splits into a protocol-agnostic byte engine ([`master_it`]) and the
//! write-then-read transaction protocol layered on it ([`transfer`]); the
//! slave side ([`slave_it`]) is the reactive peer, clocked by the remote
//! master. Everything here talks to the registers only through the
//! [`I2cPeriph`] / [`I2cSlavePeriph`] contracts, so the whole core runs on
//! the host in the tests.

pub mod master_it;
pub mod slave_it;
pub mod transfer;

#[cfg(test)]
pub(crate) mod sim;

pub use master_it::{
    BusEvent, Continuation, MasterEngine, MasterErrorHandler, MasterInterruptHandler,
    MasterSession, Primitive,
};
pub use slave_it::{I2cSlave, SlaveErrorHandler, SlaveHandler, SlaveInterruptHandler};
pub use transfer::{I2cMaster, Outcome, Transfer};

use embedded_hal::i2c::ErrorKind;
pub use embedded_hal::i2c::NoAcknowledgeSource;

/// Master-mode primitive operations the byte engine drives directly.
///
/// Implementations only poke registers; every sequencing decision lives in
/// the engine. One method call corresponds to one bus primitive, and the
/// completion of that primitive is what raises the next interrupt.
pub trait I2cPeriph {
    /// Issue a START condition and enable the completion interrupts.
    fn it_send_start(&mut self);
    /// Issue a repeated START without releasing the bus.
    fn send_restart(&mut self);
    fn send_stop(&mut self);
    /// Transmit one byte (address or data).
    fn write_data(&mut self, data: u8);
    /// Arm reception of the next byte.
    fn receive_enable(&mut self);
    /// Drive the acknowledge bit for the byte currently being received.
    fn set_ack(&mut self, ack: bool);
    /// The byte latched by the last read primitive.
    fn read_data(&self) -> u8;
    /// Acknowledge status sampled after the last write-class primitive.
    fn nack_received(&mut self) -> bool;
    fn disable_all_interrupt(&mut self);
    /// Read and clear a latched fault flag.
    fn get_and_clean_error(&mut self) -> Option<Error>;
}

/// Slave-mode register contract, one decoded event per interrupt.
pub trait I2cSlavePeriph {
    /// Program the 7-bit own address, start acknowledging it and enable
    /// the slave interrupts.
    fn slave_enable(&mut self, addr: u8);
    /// Stop acknowledging the own address.
    fn slave_disable(&mut self);
    /// Decode the cause of the pending interrupt.
    fn slave_event(&mut self) -> Option<SlaveEvent>;
    fn write_data(&mut self, data: u8);
    fn read_data(&self) -> u8;
    /// Stop stretching the clock so the master's next edge can proceed.
    fn release_clock(&mut self);
    /// Read and clear a latched fault flag.
    fn get_and_clean_error(&mut self) -> Option<Error>;
}

/// What the slave hardware reported for this interrupt.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlaveEvent {
    /// Own address matched; the direction bit says who transmits next.
    Address(Direction),
    /// A data byte from the master is waiting in the receive register.
    Received,
    /// The shifter wants the next byte for the master.
    Requested,
    /// The bus cycle following the final transmitted byte.
    Cycle,
    /// STOP condition seen while we were addressed.
    Stopped,
}

/// Transfer direction from the address phase, master's point of view.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// The master reads; we transmit.
    MasterRead,
    /// The master writes; we receive.
    MasterWrite,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Overrun/underrun
    Overrun,
    /// No ack received
    NoAcknowledge(NoAcknowledgeSource),
    /// Bus error
    Bus,
    /// Arbitration was lost
    ArbitrationLoss,
    Other,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Overrun => ErrorKind::Overrun,
            Self::Bus => ErrorKind::Bus,
            Self::ArbitrationLoss => ErrorKind::ArbitrationLoss,
            Self::NoAcknowledge(nack) => ErrorKind::NoAcknowledge(nack),
            Self::Other => ErrorKind::Other,
        }
    }
}
