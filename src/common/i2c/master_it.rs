//! Master byte engine.
//!
//! Exactly one bus primitive is in flight at any time. Every completion
//! interrupt asks the registered [`Continuation`] for the next primitive,
//! so the engine itself is protocol-agnostic; [`transfer`](super::transfer)
//! supplies the write-then-read protocol that firmware actually uses.

use super::*;
use crate::common::atomic_cell::{AtomicCell, AtomicCellMember, Ordering};
use crate::l;
use alloc::sync::Arc;
use core::cell::UnsafeCell;

// Primitives -------------------------------------------------------

/// One indivisible bus action, executed per completion interrupt.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Primitive {
    /// Arm reception of one byte; it arrives as [`BusEvent::Data`].
    Read,
    /// Transmit one byte (address or data).
    Write(u8),
    /// Repeated START without releasing the bus.
    Restart,
    /// Acknowledge the byte being received (more data wanted).
    Ack,
    /// Refuse further bytes; the peer stops driving the data line.
    Nack,
    Stop,
    /// Transaction complete; the engine returns to idle by itself.
    Done,
    /// Transaction complete but the engine stays busy; the caller owns the
    /// subsequent [`reset`](MasterEngine::reset). This lets a continuation
    /// chain a new phase without a redundant engine reset in between.
    Quit,
}

/// What the primitive that just completed produced.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusEvent {
    /// A write-class primitive finished; `nack` is the acknowledge bit
    /// sampled from the peer. It is meaningless after START, RESTART,
    /// ACK/NACK and STOP and the continuation ignores it there.
    Control { nack: bool },
    /// A read primitive finished with this byte.
    Data(u8),
}

/// Decides the next primitive after every completion interrupt.
pub trait Continuation: Send {
    fn next(&mut self, event: BusEvent) -> Primitive;

    /// The transaction was cut short by a hardware fault; the engine has
    /// already been taken idle and interrupts are off.
    fn fault(&mut self) {}
}

/// The primitive currently on the wire. `None` doubles as the idle
/// sentinel: no continuation call is outstanding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Issued {
    None = 0,
    Start = 1,
    Read = 2,
    Write = 3,
    Restart = 4,
    Ack = 5,
    Nack = 6,
    Stop = 7,
}

impl AtomicCellMember for Issued {
    #[inline]
    fn as_num(self) -> usize {
        self as usize
    }

    #[inline]
    unsafe fn from_num(value: usize) -> Self {
        match value {
            1 => Self::Start,
            2 => Self::Read,
            3 => Self::Write,
            4 => Self::Restart,
            5 => Self::Ack,
            6 => Self::Nack,
            7 => Self::Stop,
            _ => Self::None,
        }
    }
}

// Session ----------------------------------------------------------

/// Per-bus session record shared between the mainline handle and this
/// bus's interrupt handlers.
///
/// Mutual exclusion holds by construction: the mainline writes `cont` only
/// while `busy` is clear, and `busy` is set before the primitive that will
/// raise the first interrupt is issued. Afterwards only the bus's own
/// interrupt touches the record, and a bus has one interrupt source.
pub struct MasterSession<C> {
    busy: AtomicCell<bool>,
    issued: AtomicCell<Issued>,
    pub(crate) cont: UnsafeCell<C>,
}

unsafe impl<C: Send> Sync for MasterSession<C> {}

impl<C: Continuation> MasterSession<C> {
    fn new(cont: C) -> Self {
        Self {
            busy: AtomicCell::new(false),
            issued: AtomicCell::new(Issued::None),
            cont: UnsafeCell::new(cont),
        }
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn to_idle(&self) {
        self.issued.store(Issued::None, Ordering::Relaxed);
        self.busy.store(false, Ordering::Release);
    }
}

// Engine (mainline side) -------------------------------------------

pub struct MasterEngine<I2C, C> {
    i2c: I2C,
    session: Arc<MasterSession<C>>,
}

impl<I2C, C> MasterEngine<I2C, C>
where
    I2C: I2cPeriph,
    C: Continuation,
{
    pub fn new(
        i2c: [I2C; 3],
        cont: C,
    ) -> (
        Self,
        MasterInterruptHandler<I2C, C>,
        MasterErrorHandler<I2C, C>,
    ) {
        let session = Arc::new(MasterSession::new(cont));
        let [i2c, i2c2, i2c3] = i2c;
        let it = MasterInterruptHandler {
            i2c: i2c2,
            session: Arc::clone(&session),
        };
        let it_err = MasterErrorHandler {
            i2c: i2c3,
            session: Arc::clone(&session),
        };
        (Self { i2c, session }, it, it_err)
    }

    /// Begin a transaction by issuing a START condition.
    ///
    /// Starting while a transaction is in progress is a caller-contract
    /// violation and fatal; check [`is_busy`](Self::is_busy) first when a
    /// conflict is a reachable state. The in-flight transaction is never
    /// disturbed.
    pub fn start(&mut self) {
        l::assert!(
            !self.session.is_busy(),
            "i2c: transaction already in progress"
        );
        self.session.issued.store(Issued::Start, Ordering::Relaxed);
        self.session.busy.store(true, Ordering::Release);
        self.i2c.it_send_start();
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    /// Force-clear the busy flag without touching hardware.
    ///
    /// Pairs with [`Primitive::Quit`], and recovers a session after an
    /// external bus fault. Only safe once the bus is physically idle; it
    /// never aborts a transaction that is still on the wire.
    pub fn reset(&mut self) {
        self.session.to_idle();
    }

    /// Mutate the continuation from the mainline. Fatal while a
    /// transaction is in flight: the record is interrupt-owned then.
    pub(crate) fn with_cont<R>(&mut self, f: impl FnOnce(&mut C) -> R) -> R {
        l::assert!(!self.session.is_busy(), "i2c: session record is in use");
        f(unsafe { &mut *self.session.cont.get() })
    }

    pub(crate) fn session(&self) -> &MasterSession<C> {
        &self.session
    }
}

// Interrupt handlers -----------------------------------------------

pub struct MasterInterruptHandler<I2C, C> {
    i2c: I2C,
    session: Arc<MasterSession<C>>,
}

impl<I2C, C> MasterInterruptHandler<I2C, C>
where
    I2C: I2cPeriph,
    C: Continuation,
{
    /// One engine step; call from the bus's event vector.
    pub fn handler(&mut self) {
        step(&mut self.i2c, &self.session, false);
    }
}

pub struct MasterErrorHandler<I2C, C> {
    i2c: I2C,
    session: Arc<MasterSession<C>>,
}

impl<I2C, C> MasterErrorHandler<I2C, C>
where
    I2C: I2cPeriph,
    C: Continuation,
{
    /// Call from the bus's error vector.
    ///
    /// On this hardware a NACK raises the error vector, but it is a
    /// protocol answer rather than a fault, so it re-enters the engine as
    /// the acknowledge bit of the primitive that just completed. Real
    /// faults end the transaction; electrical recovery is the owner's call.
    pub fn handler(&mut self) {
        match self.i2c.get_and_clean_error() {
            Some(Error::NoAcknowledge(_)) => step(&mut self.i2c, &self.session, true),
            Some(_) => {
                self.i2c.disable_all_interrupt();
                // Deliver the failure before the busy flag clears, so a
                // poller that wakes on idle reads a settled record.
                let cont = unsafe { &mut *self.session.cont.get() };
                cont.fault();
                self.session.to_idle();
            }
            None => (),
        }
    }
}

/// Per-interrupt algorithm: build the event from the primitive that just
/// completed, ask the continuation, dispatch its answer. The new `issued`
/// value is recorded before the hardware is touched so a back-to-back
/// completion always sees the primitive it belongs to.
fn step<I2C, C>(i2c: &mut I2C, session: &MasterSession<C>, nack: bool)
where
    I2C: I2cPeriph,
    C: Continuation,
{
    let event = match session.issued.load(Ordering::Acquire) {
        // Spurious wakeup; nothing owns the bus.
        Issued::None => return,
        Issued::Read => BusEvent::Data(i2c.read_data()),
        _ => BusEvent::Control {
            nack: nack || i2c.nack_received(),
        },
    };

    let cont = unsafe { &mut *session.cont.get() };
    match cont.next(event) {
        Primitive::Read => {
            session.issued.store(Issued::Read, Ordering::Release);
            i2c.receive_enable();
        }
        Primitive::Write(data) => {
            session.issued.store(Issued::Write, Ordering::Release);
            i2c.write_data(data);
        }
        Primitive::Restart => {
            session.issued.store(Issued::Restart, Ordering::Release);
            i2c.send_restart();
        }
        Primitive::Ack => {
            session.issued.store(Issued::Ack, Ordering::Release);
            i2c.set_ack(true);
        }
        Primitive::Nack => {
            session.issued.store(Issued::Nack, Ordering::Release);
            i2c.set_ack(false);
        }
        Primitive::Stop => {
            session.issued.store(Issued::Stop, Ordering::Release);
            i2c.send_stop();
        }
        Primitive::Done => {
            i2c.disable_all_interrupt();
            session.to_idle();
        }
        Primitive::Quit => {
            i2c.disable_all_interrupt();
            session.issued.store(Issued::None, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::sim::{Op, SimI2c};
    use super::*;
    use std::vec::Vec;

    /// Replays a fixed primitive list; the engine sees one per interrupt.
    struct Script {
        plan: Vec<Primitive>,
        at: usize,
        events: Vec<BusEvent>,
        faulted: bool,
    }

    impl Script {
        fn new(plan: Vec<Primitive>) -> Self {
            Self {
                plan,
                at: 0,
                events: Vec::new(),
                faulted: false,
            }
        }
    }

    impl Continuation for Script {
        fn next(&mut self, event: BusEvent) -> Primitive {
            self.events.push(event);
            let p = self.plan[self.at];
            self.at += 1;
            p
        }

        fn fault(&mut self) {
            self.faulted = true;
        }
    }

    fn engine(
        plan: Vec<Primitive>,
    ) -> (
        SimI2c,
        MasterEngine<SimI2c, Script>,
        MasterInterruptHandler<SimI2c, Script>,
        MasterErrorHandler<SimI2c, Script>,
    ) {
        let [a, b, c] = SimI2c::new();
        let probe = a.probe();
        let (eng, it, it_err) = MasterEngine::new([a, b, c], Script::new(plan));
        (probe, eng, it, it_err)
    }

    #[test]
    fn one_primitive_per_interrupt_then_done() {
        let (sim, mut eng, mut it, _) = engine(vec![
            Primitive::Write(0xA0),
            Primitive::Write(0x55),
            Primitive::Stop,
            Primitive::Done,
        ]);

        eng.start();
        assert!(eng.is_busy());
        while eng.is_busy() {
            it.handler();
        }

        assert_eq!(
            sim.ops(),
            [
                Op::Start,
                Op::Write(0xA0),
                Op::Write(0x55),
                Op::Stop,
            ]
        );
        // DONE shuts the interrupts off on its own.
        assert!(!sim.interrupts_enabled());
    }

    #[test]
    fn read_byte_is_delivered_as_data_event() {
        let (sim, mut eng, mut it, _) = engine(vec![
            Primitive::Write(0xA1),
            Primitive::Read,
            Primitive::Nack,
            Primitive::Stop,
            Primitive::Done,
        ]);
        sim.feed_rx(&[0x5A]);

        eng.start();
        while eng.is_busy() {
            it.handler();
        }

        let events = eng.with_cont(|c| c.events.clone());
        assert_eq!(events[2], BusEvent::Data(0x5A));
        assert_eq!(
            sim.ops(),
            [
                Op::Start,
                Op::Write(0xA1),
                Op::ReadEnable,
                Op::Ack(false),
                Op::Stop,
            ]
        );
    }

    #[test]
    fn quit_leaves_the_busy_flag_for_the_caller() {
        let (_, mut eng, mut it, _) = engine(vec![Primitive::Stop, Primitive::Quit]);

        eng.start();
        it.handler();
        it.handler();

        // The engine is done with the wire but deliberately still marked
        // busy: a competing start cannot slip in before the caller's next
        // phase.
        assert!(eng.is_busy());
        eng.reset();
        assert!(!eng.is_busy());
    }

    #[test]
    fn reset_is_idempotent_once_idle() {
        let (_, mut eng, mut it, _) = engine(vec![Primitive::Stop, Primitive::Done]);
        eng.start();
        it.handler();
        it.handler();
        eng.reset();
        eng.reset();
        assert!(!eng.is_busy());
    }

    #[test]
    #[should_panic]
    fn start_while_busy_is_fatal() {
        let (_, mut eng, _, _) = engine(vec![]);
        eng.start();
        eng.start();
    }

    #[test]
    fn spurious_interrupt_while_idle_is_ignored() {
        let (sim, _eng, mut it, _) = engine(vec![]);
        it.handler();
        assert!(sim.ops().is_empty());
    }

    #[test]
    fn hardware_fault_ends_the_transaction() {
        let (sim, mut eng, _, mut it_err) = engine(vec![]);
        eng.start();
        sim.feed_error(Error::Bus);
        it_err.handler();

        assert!(!eng.is_busy());
        assert!(eng.with_cont(|c| c.faulted));
    }

    #[test]
    fn nack_reenters_the_engine_through_the_error_vector() {
        let (sim, mut eng, _, mut it_err) = engine(vec![Primitive::Stop]);
        eng.start();
        sim.feed_error(Error::NoAcknowledge(NoAcknowledgeSource::Unknown));
        it_err.handler();

        // Still busy: the continuation answered STOP, not DONE, yet.
        assert!(eng.is_busy());
        assert_eq!(sim.ops(), [Op::Start, Op::Stop]);
    }
}
