//! Scripted bus double for the host-side tests.
//!
//! Each `handler()` call stands for one completion interrupt: the
//! simulator records the primitive the engine issued and answers with the
//! scripted acknowledge bit, read byte or slave event. Three handles share
//! one wire, mirroring how the device layer steals register-block copies
//! for the interrupt handlers.

use super::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Start,
    Restart,
    Stop,
    Write(u8),
    ReadEnable,
    Ack(bool),
    ReleaseClock,
}

#[derive(Default)]
struct Wire {
    ops: Vec<Op>,
    nack_script: VecDeque<bool>,
    rx_script: VecDeque<u8>,
    slave_events: VecDeque<SlaveEvent>,
    errors: VecDeque<Error>,
    slave_writes: Vec<u8>,
    last_nack: bool,
    last_rx: u8,
    it_enabled: bool,
    own_address: Option<u8>,
}

pub struct SimI2c(Arc<Mutex<Wire>>);

impl SimI2c {
    pub fn new() -> [SimI2c; 3] {
        let wire = Arc::new(Mutex::new(Wire::default()));
        [
            SimI2c(Arc::clone(&wire)),
            SimI2c(Arc::clone(&wire)),
            SimI2c(wire),
        ]
    }

    /// Another handle on the same wire, for test inspection.
    pub fn probe(&self) -> SimI2c {
        SimI2c(Arc::clone(&self.0))
    }

    fn wire(&self) -> std::sync::MutexGuard<'_, Wire> {
        self.0.lock().unwrap()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.wire().ops.clone()
    }

    /// Script the acknowledge bit answered to upcoming byte writes; the
    /// default once the script runs dry is ACK.
    pub fn feed_nacks(&self, nacks: &[bool]) {
        self.wire().nack_script.extend(nacks.iter().copied());
    }

    /// Script the bytes the wire will produce for read primitives and
    /// slave receptions.
    pub fn feed_rx(&self, bytes: &[u8]) {
        self.wire().rx_script.extend(bytes.iter().copied());
    }

    pub fn feed_slave_events(&self, events: &[SlaveEvent]) {
        self.wire().slave_events.extend(events.iter().copied());
    }

    pub fn feed_error(&self, error: Error) {
        self.wire().errors.push_back(error);
    }

    pub fn slave_writes(&self) -> Vec<u8> {
        self.wire().slave_writes.clone()
    }

    pub fn own_address(&self) -> Option<u8> {
        self.wire().own_address
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.wire().it_enabled
    }

    fn pop_error(&self) -> Option<Error> {
        self.wire().errors.pop_front()
    }
}

impl I2cPeriph for SimI2c {
    fn it_send_start(&mut self) {
        let mut w = self.wire();
        w.it_enabled = true;
        w.last_nack = false;
        w.ops.push(Op::Start);
    }

    fn send_restart(&mut self) {
        let mut w = self.wire();
        w.last_nack = false;
        w.ops.push(Op::Restart);
    }

    fn send_stop(&mut self) {
        let mut w = self.wire();
        w.last_nack = false;
        w.ops.push(Op::Stop);
    }

    fn write_data(&mut self, data: u8) {
        let mut w = self.wire();
        w.ops.push(Op::Write(data));
        w.last_nack = w.nack_script.pop_front().unwrap_or(false);
    }

    fn receive_enable(&mut self) {
        let mut w = self.wire();
        w.ops.push(Op::ReadEnable);
        w.last_rx = w.rx_script.pop_front().unwrap_or(0xFF);
    }

    fn set_ack(&mut self, ack: bool) {
        let mut w = self.wire();
        w.last_nack = false;
        w.ops.push(Op::Ack(ack));
    }

    fn read_data(&self) -> u8 {
        self.wire().last_rx
    }

    fn nack_received(&mut self) -> bool {
        self.wire().last_nack
    }

    fn disable_all_interrupt(&mut self) {
        self.wire().it_enabled = false;
    }

    fn get_and_clean_error(&mut self) -> Option<Error> {
        self.pop_error()
    }
}

impl I2cSlavePeriph for SimI2c {
    fn slave_enable(&mut self, addr: u8) {
        let mut w = self.wire();
        w.it_enabled = true;
        w.own_address = Some(addr);
    }

    fn slave_disable(&mut self) {
        let mut w = self.wire();
        w.it_enabled = false;
        w.own_address = None;
    }

    fn slave_event(&mut self) -> Option<SlaveEvent> {
        let mut w = self.wire();
        let event = w.slave_events.pop_front()?;
        if event == SlaveEvent::Received {
            w.last_rx = w.rx_script.pop_front().unwrap_or(0xFF);
        }
        Some(event)
    }

    fn write_data(&mut self, data: u8) {
        let mut w = self.wire();
        w.ops.push(Op::Write(data));
        w.slave_writes.push(data);
    }

    fn read_data(&self) -> u8 {
        self.wire().last_rx
    }

    fn release_clock(&mut self) {
        self.wire().ops.push(Op::ReleaseClock);
    }

    fn get_and_clean_error(&mut self) -> Option<Error> {
        self.pop_error()
    }
}
