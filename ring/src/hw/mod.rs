//! Hardware access layer.
//!
//! The rings only ever talk to a [`DescriptorPort`]. [`MmioPort`] is the
//! register-backed implementation; tests and simulators provide their own.

pub mod mmio;
pub mod port;

pub use mmio::{wait_for_bits, Mmio, SharedMmio};
pub use port::{DescriptorPort, MmioPort, RingRegs};
