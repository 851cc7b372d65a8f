//! Portable layer: everything here is hardware-agnostic and runs on the
//! host under the `std` feature, driven by the scripted bus simulator in
//! the tests. The `i2c` device layer binds it to real registers.

pub mod atomic_cell;
pub mod i2c;
pub mod simplest_heap;
