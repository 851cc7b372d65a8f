//! Write-then-read master transaction protocol.
//!
//! [`Transfer`] is the one [`Continuation`] firmware normally runs: it
//! walks the byte engine through START, the address phase, the write
//! bytes, an optional repeated START with a second address phase, the read
//! bytes and the closing STOP, interpreting the acknowledge bit after
//! every write-class primitive. A peer NACK aborts the transaction with a
//! STOP; bytes already delivered are not rolled back.

use super::master_it::*;
use super::*;
use crate::l;
use core::sync::atomic::{Ordering, compiler_fence};

// Outcome ----------------------------------------------------------

/// Result taxonomy of the last finished transaction.
///
/// The completion callback only carries the aggregate boolean; this record
/// keeps which phase refused, for callers that want to tell a missing
/// device from a rejected register or payload byte.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Nothing has finished yet (idle since start-up, or in flight).
    None,
    Complete,
    /// The address phase was not acknowledged.
    NackAddress,
    /// The first written byte, conventionally the register selector, was
    /// refused.
    NackRegister,
    /// A later data byte was refused.
    NackData,
    /// A hardware fault ended the transaction.
    Fault,
}

impl Outcome {
    fn to_error(self) -> Error {
        match self {
            Self::NackAddress => Error::NoAcknowledge(NoAcknowledgeSource::Address),
            Self::NackRegister | Self::NackData => {
                Error::NoAcknowledge(NoAcknowledgeSource::Data)
            }
            Self::Fault => Error::Bus,
            Self::None | Self::Complete => Error::Other,
        }
    }
}

// Protocol state machine -------------------------------------------

/// Protocol position, named after the primitive whose completion the next
/// interrupt will report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    StartDone,
    AddressDone,
    WriteInProgress,
    ReadInProgress,
    AckDone,
    NackDone,
    StopDone,
}

/// The transaction record seeded by the mainline and owned by the
/// interrupt until completion. Buffers are raw because the record outlives
/// the borrow that seeded it; the handle's API keeps that sound.
pub struct Transfer {
    state: State,
    addr: u8,
    write: *const u8,
    write_len: usize,
    write_pos: usize,
    read: *mut u8,
    read_len: usize,
    read_pos: usize,
    ok: bool,
    outcome: Outcome,
    on_done: Option<fn(bool)>,
}

// The raw pointers are the caller's pinned buffers, accessed by exactly
// one context at a time per the session's mutual-exclusion rule.
unsafe impl Send for Transfer {}

impl Transfer {
    fn idle() -> Self {
        Self {
            state: State::Idle,
            addr: 0,
            write: core::ptr::null(),
            write_len: 0,
            write_pos: 0,
            read: core::ptr::null_mut(),
            read_len: 0,
            read_pos: 0,
            ok: false,
            outcome: Outcome::None,
            on_done: None,
        }
    }

    fn seed(&mut self, addr: u8, write: &[u8], read: &mut [u8], on_done: Option<fn(bool)>) {
        self.addr = addr;
        self.write = write.as_ptr();
        self.write_len = write.len();
        self.write_pos = 0;
        self.read = read.as_mut_ptr();
        self.read_len = read.len();
        self.read_pos = 0;
        self.ok = false;
        self.outcome = Outcome::None;
        self.on_done = on_done;
        self.state = State::StartDone;
    }

    #[inline]
    fn write_remaining(&self) -> usize {
        self.write_len - self.write_pos
    }

    #[inline]
    fn read_remaining(&self) -> usize {
        self.read_len - self.read_pos
    }

    fn next_write_byte(&mut self) -> Primitive {
        let byte = unsafe { *self.write.add(self.write_pos) };
        self.write_pos += 1;
        self.state = State::WriteInProgress;
        Primitive::Write(byte)
    }

    fn begin_read(&mut self) -> Primitive {
        self.state = State::ReadInProgress;
        Primitive::Read
    }

    fn finish_ok(&mut self) -> Primitive {
        self.ok = true;
        self.state = State::StopDone;
        Primitive::Stop
    }

    fn abort(&mut self, outcome: Outcome) -> Primitive {
        self.ok = false;
        self.outcome = outcome;
        self.state = State::StopDone;
        Primitive::Stop
    }
}

impl Continuation for Transfer {
    fn next(&mut self, event: BusEvent) -> Primitive {
        match self.state {
            State::StartDone => {
                // Address phase; the direction bit follows the remaining
                // work, so a repeated START lands here again and
                // re-addresses the peer for reading.
                self.state = State::AddressDone;
                if self.write_remaining() > 0 {
                    Primitive::Write(self.addr << 1)
                } else {
                    Primitive::Write((self.addr << 1) | 1)
                }
            }
            State::AddressDone => match event {
                BusEvent::Control { nack: true } => self.abort(Outcome::NackAddress),
                BusEvent::Control { nack: false } => {
                    if self.write_remaining() > 0 {
                        self.next_write_byte()
                    } else if self.read_remaining() > 0 {
                        self.begin_read()
                    } else {
                        self.finish_ok()
                    }
                }
                BusEvent::Data(_) => l::unreachable!(),
            },
            State::WriteInProgress => match event {
                BusEvent::Control { nack: true } => {
                    // The refused byte is not retried, and anything the
                    // peer already acknowledged stays delivered.
                    if self.write_pos <= 1 {
                        self.abort(Outcome::NackRegister)
                    } else {
                        self.abort(Outcome::NackData)
                    }
                }
                BusEvent::Control { nack: false } => {
                    if self.write_remaining() > 0 {
                        self.next_write_byte()
                    } else if self.read_remaining() > 0 {
                        self.state = State::StartDone;
                        Primitive::Restart
                    } else {
                        self.finish_ok()
                    }
                }
                BusEvent::Data(_) => l::unreachable!(),
            },
            State::ReadInProgress => match event {
                BusEvent::Data(byte) => {
                    unsafe { *self.read.add(self.read_pos) = byte };
                    self.read_pos += 1;
                    if self.read_remaining() > 0 {
                        self.state = State::AckDone;
                        Primitive::Ack
                    } else {
                        // Refusing the last byte tells the peer to let go
                        // of the data line before the STOP.
                        self.ok = true;
                        self.state = State::NackDone;
                        Primitive::Nack
                    }
                }
                BusEvent::Control { .. } => l::unreachable!(),
            },
            State::AckDone => self.begin_read(),
            State::NackDone => {
                self.state = State::StopDone;
                Primitive::Stop
            }
            State::StopDone => {
                self.state = State::Idle;
                if self.ok {
                    self.outcome = Outcome::Complete;
                }
                if let Some(on_done) = self.on_done.take() {
                    on_done(self.ok);
                }
                Primitive::Done
            }
            // The engine never calls an idle continuation; reaching this
            // is a driver bug, not a bus condition.
            State::Idle => l::unreachable!(),
        }
    }

    fn fault(&mut self) {
        self.state = State::Idle;
        self.ok = false;
        self.outcome = Outcome::Fault;
        if let Some(on_done) = self.on_done.take() {
            on_done(false);
        }
    }
}

// Master handle ----------------------------------------------------

/// Largest payload [`I2cMaster::write_register`] can frame on the stack.
pub const MAX_REGISTER_WRITE: usize = 32;

pub struct I2cMaster<I2C> {
    engine: MasterEngine<I2C, Transfer>,
}

impl<I2C: I2cPeriph> I2cMaster<I2C> {
    /// Build the mainline handle plus the handlers for the event and
    /// error vectors.
    pub fn new(
        i2c: [I2C; 3],
    ) -> (
        Self,
        MasterInterruptHandler<I2C, Transfer>,
        MasterErrorHandler<I2C, Transfer>,
    ) {
        let (engine, it, it_err) = MasterEngine::new(i2c, Transfer::idle());
        (Self { engine }, it, it_err)
    }

    /// Start a write-then-read transaction and return immediately.
    ///
    /// `on_done` runs in interrupt context with the aggregate result once
    /// the STOP condition has been issued. Starting while busy is fatal;
    /// see [`MasterEngine::start`].
    ///
    /// # Safety
    ///
    /// Both buffers must stay valid and untouched until `on_done` has run
    /// (or, after an external bus fault, until [`reset`](Self::reset));
    /// the interrupt reads and writes them directly.
    pub unsafe fn transfer_async(
        &mut self,
        addr: u8,
        write: &[u8],
        read: &mut [u8],
        on_done: fn(bool),
    ) {
        self.start_transfer(addr, write, read, Some(on_done));
    }

    /// Run a write-then-read transaction to completion; `true` means every
    /// byte was acknowledged.
    ///
    /// The wait is deliberately a busy poll: a WFI here could gate the
    /// very clock the completion interrupt is attached to.
    pub fn transfer_block(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> bool {
        self.start_transfer(addr, write, read, None);
        while self.engine.is_busy() {
            compiler_fence(Ordering::Acquire);
        }
        self.last_outcome() == Outcome::Complete
    }

    /// Select `register`, then read `out.len()` bytes from it.
    pub fn read_register(&mut self, addr: u8, register: u8, out: &mut [u8]) -> bool {
        self.transfer_block(addr, &[register], out)
    }

    /// Select `register`, then write `data` to it in the same transaction.
    pub fn write_register(&mut self, addr: u8, register: u8, data: &[u8]) -> bool {
        l::assert!(
            data.len() <= MAX_REGISTER_WRITE,
            "i2c: register write too long"
        );
        let mut frame = [0u8; MAX_REGISTER_WRITE + 1];
        frame[0] = register;
        frame[1..=data.len()].copy_from_slice(data);
        self.transfer_block(addr, &frame[..data.len() + 1], &mut [])
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.engine.is_busy()
    }

    /// See [`MasterEngine::reset`]: flag-only, bus-fault recovery.
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    /// Which phase ended the last transaction. [`Outcome::None`] while one
    /// is still in flight; the record is interrupt-owned then.
    pub fn last_outcome(&self) -> Outcome {
        if self.engine.is_busy() {
            return Outcome::None;
        }
        unsafe { (*self.engine.session().cont.get()).outcome }
    }

    fn start_transfer(
        &mut self,
        addr: u8,
        write: &[u8],
        read: &mut [u8],
        on_done: Option<fn(bool)>,
    ) {
        l::assert!(addr < 0x80, "i2c: 7-bit address out of range");
        l::assert!(
            !write.is_empty() || !read.is_empty(),
            "i2c: nothing to transfer"
        );
        self.engine.with_cont(|t| t.seed(addr, write, read, on_done));
        self.engine.start();
    }
}

// Implement embedded-hal traits ------------------------------------

impl<I2C: I2cPeriph> embedded_hal::i2c::ErrorType for I2cMaster<I2C> {
    type Error = Error;
}

impl<I2C: I2cPeriph> embedded_hal::i2c::I2c<embedded_hal::i2c::SevenBitAddress>
    for I2cMaster<I2C>
{
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [embedded_hal::i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        use embedded_hal::i2c::Operation;

        let done = match operations {
            [Operation::Write(write)] => self.transfer_block(address, write, &mut []),
            [Operation::Read(read)] => self.transfer_block(address, &[], read),
            [Operation::Write(write), Operation::Read(read)] => {
                let write: &[u8] = write;
                self.transfer_block(address, write, read)
            }
            // The engine sequences one write phase and one read phase per
            // transaction.
            _ => return Err(Error::Other),
        };
        if done {
            Ok(())
        } else {
            Err(self.last_outcome().to_error())
        }
    }
}
