//! Memory-mapped register access.
//!
//! # Safety
//! Implementations own the mapping; callers only pass register offsets.

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{Result, RingError};

/// 32-bit register window.
pub trait Mmio {
    /// Read the register at `offset`.
    fn read32(&mut self, offset: u32) -> u32;

    /// Write `value` to the register at `offset`.
    fn write32(&mut self, offset: u32, value: u32);

    /// Read-modify-write: clear `clear`, then set `set`.
    fn modify32(&mut self, offset: u32, clear: u32, set: u32) {
        let value = self.read32(offset);
        self.write32(offset, (value & !clear) | set);
    }
}

impl<T: Mmio + ?Sized> Mmio for &mut T {
    fn read32(&mut self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }

    fn modify32(&mut self, offset: u32, clear: u32, set: u32) {
        (**self).modify32(offset, clear, set)
    }
}

/// Register block shared by several ring owners.
///
/// Two MAC instances behind one register window (shared interrupt mask,
/// shared reset control) each get a clone. Every access, including the
/// whole of a read-modify-write, happens under one lock. The window lives
/// until the last clone drops.
pub struct SharedMmio<M> {
    inner: Arc<Mutex<M>>,
}

impl<M> SharedMmio<M> {
    /// Wrap a register window.
    pub fn new(mmio: M) -> Self {
        Self {
            inner: Arc::new(Mutex::new(mmio)),
        }
    }

    /// Run `f` with exclusive access to the window.
    pub fn with<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }

    /// Number of handles sharing the window.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<M> Clone for SharedMmio<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Mmio> Mmio for SharedMmio<M> {
    fn read32(&mut self, offset: u32) -> u32 {
        self.inner.lock().read32(offset)
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.inner.lock().write32(offset, value)
    }

    fn modify32(&mut self, offset: u32, clear: u32, set: u32) {
        self.inner.lock().modify32(offset, clear, set)
    }
}

/// Poll `offset` until `value & mask == expected`.
///
/// Reads the register at most `retries` times, then fails with
/// [`RingError::HandshakeTimeout`]. Returns the matching value.
pub fn wait_for_bits<M: Mmio + ?Sized>(
    mmio: &mut M,
    offset: u32,
    mask: u32,
    expected: u32,
    retries: u32,
) -> Result<u32> {
    for _ in 0..retries {
        let value = mmio.read32(offset);
        if value & mask == expected {
            return Ok(value);
        }
        core::hint::spin_loop();
    }
    Err(RingError::HandshakeTimeout { offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Regs {
        values: HashMap<u32, u32>,
        reads: usize,
    }

    impl Mmio for Regs {
        fn read32(&mut self, offset: u32) -> u32 {
            self.reads += 1;
            *self.values.get(&offset).unwrap_or(&0)
        }

        fn write32(&mut self, offset: u32, value: u32) {
            self.values.insert(offset, value);
        }
    }

    #[test]
    fn test_modify_preserves_other_bits() {
        let mut regs = Regs::default();
        regs.write32(0x10, 0b1010);
        regs.modify32(0x10, 0b0010, 0b0001);
        assert_eq!(regs.read32(0x10), 0b1001);
    }

    #[test]
    fn test_shared_window_sees_both_instances() {
        let mut a = SharedMmio::new(Regs::default());
        let mut b = a.clone();
        assert_eq!(a.holders(), 2);

        a.modify32(0x10, 0, 1 << 0);
        b.modify32(0x10, 0, 1 << 1);
        assert_eq!(a.read32(0x10), 0b11);

        drop(b);
        assert_eq!(a.holders(), 1);
    }

    #[test]
    fn test_handshake_times_out() {
        let mut regs = Regs::default();
        let err = wait_for_bits(&mut regs, 0x20, 1, 1, 5).unwrap_err();
        assert_eq!(err, RingError::HandshakeTimeout { offset: 0x20 });
        assert_eq!(regs.reads, 5);
    }

    #[test]
    fn test_handshake_succeeds() {
        let mut regs = Regs::default();
        regs.write32(0x20, 0x81);
        assert_eq!(wait_for_bits(&mut regs, 0x20, 1, 1, 5), Ok(0x81));
        assert_eq!(regs.reads, 1);
    }
}
