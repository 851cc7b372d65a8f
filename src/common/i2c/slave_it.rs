//! Slave byte engine.
//!
//! The reactive peer of the master engine: every transition is driven by
//! the remote master's clock, and the application answers through the
//! [`SlaveHandler`] callbacks. The engine stretches the clock while it
//! works and releases it after every processed event, the address phase
//! included; that release is the bus's native flow control.

use super::*;
use crate::common::atomic_cell::{AtomicCell, AtomicCellMember, Ordering};
use crate::l;
use alloc::sync::Arc;
use core::cell::UnsafeCell;

/// Application callbacks for one slave session.
///
/// The `message_*` callbacks run exactly once per message, strictly before
/// any byte callback of that message; the byte callbacks run once per byte.
/// Everything runs in interrupt context, so keep them short.
pub trait SlaveHandler: Send {
    /// The master addressed us for writing; a message is about to arrive.
    fn message_from_master(&mut self);
    /// The master addressed us for reading; stage what will be sent.
    fn message_to_master(&mut self);
    /// One received byte; return `true` once the message is complete.
    fn byte_from_master(&mut self, byte: u8) -> bool;
    /// Produce the next byte to transmit; the flag marks the final byte of
    /// the staged message.
    fn byte_to_master(&mut self) -> (u8, bool);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SlaveState {
    Idle = 0,
    /// Transmitting to the master, one byte per interrupt.
    ToMaster = 1,
    /// Receiving from the master, one byte per interrupt.
    FromMaster = 2,
    /// The last byte is out; one more bus cycle passes before the
    /// exchange is over. No callback fires here.
    EndToMaster = 3,
}

impl AtomicCellMember for SlaveState {
    #[inline]
    fn as_num(self) -> usize {
        self as usize
    }

    #[inline]
    unsafe fn from_num(value: usize) -> Self {
        match value {
            1 => Self::ToMaster,
            2 => Self::FromMaster,
            3 => Self::EndToMaster,
            _ => Self::Idle,
        }
    }
}

/// Per-bus slave session record; the interrupt owns `handler`, the
/// mainline only flips `state` through the documented recovery entry
/// points.
pub struct SlaveSession<H> {
    state: AtomicCell<SlaveState>,
    handler: UnsafeCell<H>,
}

unsafe impl<H: Send> Sync for SlaveSession<H> {}

// Handle -----------------------------------------------------------

pub struct I2cSlave<I2C, H> {
    i2c: I2C,
    session: Arc<SlaveSession<H>>,
}

impl<I2C, H> I2cSlave<I2C, H>
where
    I2C: I2cSlavePeriph,
    H: SlaveHandler,
{
    /// Start answering `addr` with `handler`'s callbacks. Returns the
    /// mainline handle plus the handlers for the event and error vectors.
    pub fn new(
        i2c: [I2C; 3],
        addr: u8,
        handler: H,
    ) -> (
        Self,
        SlaveInterruptHandler<I2C, H>,
        SlaveErrorHandler<I2C, H>,
    ) {
        l::assert!(addr < 0x80, "i2c: 7-bit address out of range");
        let session = Arc::new(SlaveSession {
            state: AtomicCell::new(SlaveState::Idle),
            handler: UnsafeCell::new(handler),
        });
        let [mut i2c, i2c2, i2c3] = i2c;
        let it = SlaveInterruptHandler {
            i2c: i2c2,
            session: Arc::clone(&session),
        };
        let it_err = SlaveErrorHandler {
            i2c: i2c3,
            session: Arc::clone(&session),
        };
        i2c.slave_enable(addr);
        (Self { i2c, session }, it, it_err)
    }

    /// Stop acknowledging the own address. The session record survives and
    /// a later [`enable`](Self::enable) resumes from idle.
    pub fn disable(&mut self) {
        self.i2c.slave_disable();
        self.session.state.store(SlaveState::Idle, Ordering::Release);
    }

    /// Resume acknowledging `addr`.
    pub fn enable(&mut self, addr: u8) {
        l::assert!(addr < 0x80, "i2c: 7-bit address out of range");
        self.i2c.slave_enable(addr);
    }

    /// Return the session to idle without touching hardware.
    ///
    /// For bus-fault recovery only, mirroring the master engine's reset:
    /// calling it while the remote master is mid-message desynchronizes
    /// the engine from the wire.
    pub fn force_idle(&mut self) {
        self.session.state.store(SlaveState::Idle, Ordering::Release);
    }
}

// Interrupt handlers -----------------------------------------------

pub struct SlaveInterruptHandler<I2C, H> {
    i2c: I2C,
    session: Arc<SlaveSession<H>>,
}

impl<I2C, H> SlaveInterruptHandler<I2C, H>
where
    I2C: I2cSlavePeriph,
    H: SlaveHandler,
{
    /// One engine step; call from the bus's event vector.
    pub fn handler(&mut self) {
        let Some(event) = self.i2c.slave_event() else {
            return;
        };
        let state = self.session.state.load(Ordering::Acquire);
        let handler = unsafe { &mut *self.session.handler.get() };

        let next = match (state, event) {
            // A STOP ends whatever was in flight. No callback: the
            // application has already seen every byte that mattered.
            (_, SlaveEvent::Stopped) => SlaveState::Idle,
            (SlaveState::Idle, SlaveEvent::Address(Direction::MasterRead)) => {
                handler.message_to_master();
                SlaveState::ToMaster
            }
            (SlaveState::Idle, SlaveEvent::Address(Direction::MasterWrite)) => {
                // The matched address consumed this interrupt; data
                // exchange starts on the next one.
                handler.message_from_master();
                SlaveState::FromMaster
            }
            // Lingering flags with nothing addressed; let them pass.
            (SlaveState::Idle, _) => SlaveState::Idle,
            (SlaveState::ToMaster, SlaveEvent::Requested) => {
                let (byte, last) = handler.byte_to_master();
                self.i2c.write_data(byte);
                if last {
                    SlaveState::EndToMaster
                } else {
                    SlaveState::ToMaster
                }
            }
            // The cycle after the final byte; absorb it and go home.
            (SlaveState::EndToMaster, _) => SlaveState::Idle,
            (SlaveState::FromMaster, SlaveEvent::Received) => {
                let byte = self.i2c.read_data();
                if handler.byte_from_master(byte) {
                    SlaveState::Idle
                } else {
                    SlaveState::FromMaster
                }
            }
            // Any other pairing means the engine lost track of the wire:
            // a driver bug, not a bus condition.
            _ => l::unreachable!(),
        };

        self.session.state.store(next, Ordering::Release);
        self.i2c.release_clock();
    }
}

pub struct SlaveErrorHandler<I2C, H> {
    i2c: I2C,
    session: Arc<SlaveSession<H>>,
}

impl<I2C, H> SlaveErrorHandler<I2C, H>
where
    I2C: I2cSlavePeriph,
    H: SlaveHandler,
{
    /// Call from the bus's error vector. A fault while addressed drops the
    /// session back to idle; the wire state is the master's problem.
    pub fn handler(&mut self) {
        if self.i2c.get_and_clean_error().is_some() {
            self.session.state.store(SlaveState::Idle, Ordering::Release);
            self.i2c.release_clock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::sim::{Op, SimI2c};
    use super::*;
    use std::sync::{Arc as StdArc, Mutex};
    use std::vec::Vec;

    /// Records the callback order and plays a scripted reply message.
    #[derive(Default)]
    struct Journal {
        calls: Vec<String>,
        rx: Vec<u8>,
        rx_end_after: usize,
        tx: Vec<u8>,
        tx_at: usize,
    }

    #[derive(Clone)]
    struct Recorder(StdArc<Mutex<Journal>>);

    impl Recorder {
        fn new(rx_end_after: usize, tx: Vec<u8>) -> Self {
            Self(StdArc::new(Mutex::new(Journal {
                rx_end_after,
                tx,
                ..Journal::default()
            })))
        }
    }

    impl SlaveHandler for Recorder {
        fn message_from_master(&mut self) {
            self.0.lock().unwrap().calls.push("msg_from".into());
        }

        fn message_to_master(&mut self) {
            self.0.lock().unwrap().calls.push("msg_to".into());
        }

        fn byte_from_master(&mut self, byte: u8) -> bool {
            let mut j = self.0.lock().unwrap();
            j.calls.push(format!("byte_from {byte:#04x}"));
            j.rx.push(byte);
            j.rx.len() == j.rx_end_after
        }

        fn byte_to_master(&mut self) -> (u8, bool) {
            let mut j = self.0.lock().unwrap();
            j.calls.push("byte_to".into());
            let byte = j.tx[j.tx_at];
            j.tx_at += 1;
            (byte, j.tx_at == j.tx.len())
        }
    }

    fn slave(
        recorder: Recorder,
    ) -> (
        SimI2c,
        I2cSlave<SimI2c, Recorder>,
        SlaveInterruptHandler<SimI2c, Recorder>,
        SlaveErrorHandler<SimI2c, Recorder>,
    ) {
        let [a, b, c] = SimI2c::new();
        let probe = a.probe();
        let (handle, it, it_err) = I2cSlave::new([a, b, c], 0x37, recorder);
        (probe, handle, it, it_err)
    }

    #[test]
    fn message_from_master_delivers_bytes_in_order() {
        let rec = Recorder::new(2, vec![]);
        let (sim, _handle, mut it, _) = slave(rec.clone());

        sim.feed_slave_events(&[
            SlaveEvent::Address(Direction::MasterWrite),
            SlaveEvent::Received,
            SlaveEvent::Received,
        ]);
        sim.feed_rx(&[0x10, 0x20]);
        for _ in 0..3 {
            it.handler();
        }

        let j = rec.0.lock().unwrap();
        // The message callback fires once, before any byte callback, and
        // the transition that consumed the address moved no data.
        assert_eq!(
            j.calls,
            ["msg_from", "byte_from 0x10", "byte_from 0x20"]
        );
        assert_eq!(j.rx, [0x10, 0x20]);
        // Session is idle again: a new address match starts a new message.
        drop(j);
        sim.feed_slave_events(&[SlaveEvent::Address(Direction::MasterWrite)]);
        it.handler();
        assert_eq!(rec.0.lock().unwrap().calls.last().unwrap(), "msg_from");
    }

    #[test]
    fn message_to_master_ends_with_an_absorbed_cycle() {
        let rec = Recorder::new(0, vec![0xDE, 0xAD]);
        let (sim, _handle, mut it, _) = slave(rec.clone());

        sim.feed_slave_events(&[
            SlaveEvent::Address(Direction::MasterRead),
            SlaveEvent::Requested,
            SlaveEvent::Requested,
            // The cycle after the last byte; no callback may fire here.
            SlaveEvent::Cycle,
        ]);
        for _ in 0..4 {
            it.handler();
        }

        let j = rec.0.lock().unwrap();
        assert_eq!(j.calls, ["msg_to", "byte_to", "byte_to"]);
        assert_eq!(
            sim.slave_writes(),
            [0xDE, 0xAD],
            "both staged bytes were clocked out"
        );

        // Back in idle: the next address match opens a fresh message.
        drop(j);
        sim.feed_slave_events(&[SlaveEvent::Address(Direction::MasterWrite)]);
        it.handler();
        assert_eq!(rec.0.lock().unwrap().calls.last().unwrap(), "msg_from");
    }

    #[test]
    fn clock_released_after_every_event() {
        let rec = Recorder::new(1, vec![]);
        let (sim, _handle, mut it, _) = slave(rec.clone());

        sim.feed_slave_events(&[
            SlaveEvent::Address(Direction::MasterWrite),
            SlaveEvent::Received,
        ]);
        sim.feed_rx(&[0x42]);
        it.handler();
        it.handler();

        let releases = sim
            .ops()
            .iter()
            .filter(|op| **op == Op::ReleaseClock)
            .count();
        assert_eq!(releases, 2, "address phase included");
    }

    #[test]
    fn write_then_read_via_repeated_start() {
        // Register-file idiom: one selector byte in, then a read-out. The
        // restart shows up as a second address match with no STOP between.
        let rec = Recorder::new(1, vec![0x99]);
        let (sim, _handle, mut it, _) = slave(rec.clone());

        sim.feed_slave_events(&[
            SlaveEvent::Address(Direction::MasterWrite),
            SlaveEvent::Received,
            SlaveEvent::Address(Direction::MasterRead),
            SlaveEvent::Requested,
            SlaveEvent::Cycle,
        ]);
        sim.feed_rx(&[0x07]);
        for _ in 0..5 {
            it.handler();
        }

        let j = rec.0.lock().unwrap();
        assert_eq!(
            j.calls,
            ["msg_from", "byte_from 0x07", "msg_to", "byte_to"]
        );
        assert_eq!(sim.slave_writes(), [0x99]);
    }

    #[test]
    fn stop_mid_message_returns_to_idle_without_callback() {
        let rec = Recorder::new(8, vec![]);
        let (sim, _handle, mut it, _) = slave(rec.clone());

        sim.feed_slave_events(&[
            SlaveEvent::Address(Direction::MasterWrite),
            SlaveEvent::Received,
            SlaveEvent::Stopped,
            SlaveEvent::Address(Direction::MasterWrite),
        ]);
        sim.feed_rx(&[0x01]);
        for _ in 0..4 {
            it.handler();
        }

        let j = rec.0.lock().unwrap();
        assert_eq!(
            j.calls,
            ["msg_from", "byte_from 0x01", "msg_from"],
            "the STOP itself fired no callback and re-armed the session"
        );
    }

    #[test]
    fn force_idle_recovers_a_wedged_session() {
        let rec = Recorder::new(8, vec![]);
        let (sim, mut handle, mut it, _) = slave(rec.clone());

        sim.feed_slave_events(&[SlaveEvent::Address(Direction::MasterWrite)]);
        it.handler();
        handle.force_idle();

        // No hardware was touched beyond the original enable.
        sim.feed_slave_events(&[SlaveEvent::Address(Direction::MasterRead)]);
        it.handler();
        assert_eq!(rec.0.lock().unwrap().calls.last().unwrap(), "msg_to");
    }

    #[test]
    fn bus_fault_drops_the_session_to_idle() {
        let rec = Recorder::new(8, vec![]);
        let (sim, _handle, mut it, mut it_err) = slave(rec.clone());

        sim.feed_slave_events(&[SlaveEvent::Address(Direction::MasterWrite)]);
        it.handler();
        sim.feed_error(Error::Bus);
        it_err.handler();

        sim.feed_slave_events(&[SlaveEvent::Address(Direction::MasterWrite)]);
        it.handler();
        assert_eq!(rec.0.lock().unwrap().calls.last().unwrap(), "msg_from");
    }

    #[test]
    fn disable_stops_acknowledging() {
        let rec = Recorder::new(8, vec![]);
        let (sim, mut handle, _, _) = slave(rec);
        assert_eq!(sim.own_address(), Some(0x37));
        handle.disable();
        assert_eq!(sim.own_address(), None);
        handle.enable(0x37);
        assert_eq!(sim.own_address(), Some(0x37));
    }
}
