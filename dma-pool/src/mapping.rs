//! Bus address mapping.
//!
//! The pool never computes device addresses itself; it asks a [`DmaMapper`].

use alloc::sync::Arc;
use core::fmt;
use core::ptr::NonNull;

use crate::Result;

/// Device-visible bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BusAddr(pub u64);

impl BusAddr {
    /// Raw address value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Address `bytes` past this one.
    #[inline]
    pub const fn offset(self, bytes: usize) -> BusAddr {
        BusAddr(self.0 + bytes as u64)
    }

    /// Low 32 bits.
    #[inline]
    pub const fn lo(self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits.
    #[inline]
    pub const fn hi(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Transfer direction of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// CPU writes, device reads (transmit).
    ToDevice,
    /// Device writes, CPU reads (receive).
    FromDevice,
    /// Both.
    Bidirectional,
}

/// DMA mapping service.
///
/// A mapping must stay valid until `unmap` is called with the same bus
/// address, length and direction.
pub trait DmaMapper {
    /// Map `len` bytes at `cpu` for device access.
    fn map(&self, cpu: NonNull<u8>, len: usize, dir: Direction) -> Result<BusAddr>;

    /// Tear down a mapping created by `map`.
    fn unmap(&self, bus: BusAddr, len: usize, dir: Direction);

    /// Hand a CPU-written range back to the device.
    fn sync_for_device(&self, _bus: BusAddr, _len: usize, _dir: Direction) {}

    /// Make device writes to a range visible to the CPU.
    fn sync_for_cpu(&self, _bus: BusAddr, _len: usize, _dir: Direction) {}
}

impl<T: DmaMapper + ?Sized> DmaMapper for &T {
    fn map(&self, cpu: NonNull<u8>, len: usize, dir: Direction) -> Result<BusAddr> {
        (**self).map(cpu, len, dir)
    }

    fn unmap(&self, bus: BusAddr, len: usize, dir: Direction) {
        (**self).unmap(bus, len, dir)
    }

    fn sync_for_device(&self, bus: BusAddr, len: usize, dir: Direction) {
        (**self).sync_for_device(bus, len, dir)
    }

    fn sync_for_cpu(&self, bus: BusAddr, len: usize, dir: Direction) {
        (**self).sync_for_cpu(bus, len, dir)
    }
}

impl<T: DmaMapper + ?Sized> DmaMapper for Arc<T> {
    fn map(&self, cpu: NonNull<u8>, len: usize, dir: Direction) -> Result<BusAddr> {
        (**self).map(cpu, len, dir)
    }

    fn unmap(&self, bus: BusAddr, len: usize, dir: Direction) {
        (**self).unmap(bus, len, dir)
    }

    fn sync_for_device(&self, bus: BusAddr, len: usize, dir: Direction) {
        (**self).sync_for_device(bus, len, dir)
    }

    fn sync_for_cpu(&self, bus: BusAddr, len: usize, dir: Direction) {
        (**self).sync_for_cpu(bus, len, dir)
    }
}

/// Identity mapping (bus address == CPU address).
///
/// Correct for cache-coherent platforms running identity-mapped, which is
/// the bare-metal case. Syncs are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl DmaMapper for IdentityMapper {
    fn map(&self, cpu: NonNull<u8>, _len: usize, _dir: Direction) -> Result<BusAddr> {
        Ok(BusAddr(cpu.as_ptr() as usize as u64))
    }

    fn unmap(&self, _bus: BusAddr, _len: usize, _dir: Direction) {}
}
