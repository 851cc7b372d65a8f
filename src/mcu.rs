use super::*;

impl<RB, const A: usize> Steal for stm32f1::Periph<RB, A> {
    unsafe fn steal(&self) -> Self {
        unsafe { Self::steal() }
    }
}

/// Root object for the interrupt-controller handles the crate needs.
///
/// Clock-tree and pin configuration stay with the startup code; only the
/// NVIC/SCB seams cross into this crate, for callback registration and
/// priority assignment.
pub struct Mcu {
    pub scb: nvic_scb::Scb,
    pub nvic: nvic_scb::Nvic,
}

impl Mcu {
    pub fn new(scb: nvic_scb::Scb, nvic: nvic_scb::Nvic) -> Self {
        Self { scb, nvic }
    }
}
