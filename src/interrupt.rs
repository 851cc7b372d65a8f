use crate::{Mcu, l, pac::Interrupt};
use alloc::boxed::Box;
use core::{
    cell::{Cell, UnsafeCell},
    mem::MaybeUninit,
};

/// One registration slot per interrupt line: the closure moved in here is
/// what the vector runs.
pub struct Callback {
    callback: UnsafeCell<MaybeUninit<Box<dyn FnMut()>>>,
    vacant: critical_section::Mutex<Cell<bool>>,
    it_line: Interrupt,
}

unsafe impl Sync for Callback {}

/// # Safety
///
/// Sharing it across multiple interrupt callbacks may lead to a data race.
impl Callback {
    pub const fn new(it_line: Interrupt) -> Self {
        Self {
            callback: UnsafeCell::new(MaybeUninit::uninit()),
            vacant: critical_section::Mutex::new(Cell::new(true)),
            it_line,
        }
    }

    /// Register the callback and enable the interrupt line in the NVIC.
    /// A slot accepts exactly one registration; a second is fatal.
    pub fn set(&self, mcu: &mut Mcu, callback: impl FnMut() + 'static) {
        let cb = Box::new(callback);
        critical_section::with(|cs| {
            l::assert!(self.vacant.borrow(cs).get(), "interrupt line taken");
            unsafe { &mut *self.callback.get() }.write(cb);
            self.vacant.borrow(cs).set(false);
        });
        mcu.nvic.enable(self.it_line, true);
    }

    /// # Safety
    ///
    /// This function must only be called from interrupt context.
    #[inline(always)]
    pub unsafe fn call(&self) {
        let cb = unsafe { (*self.callback.get()).assume_init_mut() }.as_mut();
        (*cb)();
    }
}

#[macro_export]
macro_rules! interrupt_handler {
    ($(
        ($LINE:ident, $CALLBACK:ident),
    )+) => {
        use $crate::pac::interrupt;
        $(
            pub static $CALLBACK: $crate::interrupt::Callback =
                $crate::interrupt::Callback::new($crate::pac::Interrupt::$LINE);

            #[allow(non_snake_case)]
            #[interrupt]
            fn $LINE() {
                unsafe { $CALLBACK.call() }
            }
        )+
    };
}
