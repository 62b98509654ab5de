//! Page-backed DMA buffer pool.
//!
//! This crate supplies the receive and transmit memory for a descriptor-ring
//! driver. Every receive buffer is one page split into two halves: the ring
//! posts one half to the device while a previously delivered frame may still
//! be reading the other half.
//!
//! # Design Philosophy
//!
//! - **Bounded**: the pool never holds more than `max_pages` live pages
//! - **Soft failure**: allocation failure is an expected, recoverable result
//! - **Mapper-agnostic**: bus addresses come from a [`DmaMapper`] supplied by
//!   whatever hosts the ring (bare-metal identity map, IOMMU, test harness)
//!
//! # Half-page reuse
//!
//! ```text
//!   page: [ lower half | upper half ]
//!            ▲ posted     ▲ held by a delivered frame
//!
//!   completion -> deliver lower half -> try_reuse():
//!       upper half still held?  yes -> release page (unmap)
//!                               no  -> flip to upper half, sync, repost
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dma_pool::{BufferPool, IdentityMapper};
//!
//! let pool = BufferPool::new(IdentityMapper, 512);
//! let mut buf = pool.acquire_page()?;
//! // ... post buf.bus_addr() to the device, wait for completion ...
//! let frag = pool.fragment(&buf, len);
//! if !pool.try_reuse(&mut buf) {
//!     pool.release(buf);
//! }
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod buffer;
pub mod mapping;
pub mod page;
pub mod pool;

pub use buffer::{RxBuffer, TxBuffer};
pub use mapping::{BusAddr, Direction, DmaMapper, IdentityMapper};
pub use page::{DmaPage, Half, PageFragment};
pub use pool::BufferPool;

use core::fmt;

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Size of one reusable half of a receive page.
pub const HALF_PAGE: usize = PAGE_SIZE / 2;

// ============================================================================
// Utility functions
// ============================================================================

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment.
#[inline]
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Convert pages to bytes.
#[inline]
pub const fn pages_to_bytes(pages: usize) -> usize {
    pages * PAGE_SIZE
}

/// Convert bytes to pages (rounded up).
#[inline]
pub const fn bytes_to_pages(bytes: usize) -> usize {
    align_up(bytes, PAGE_SIZE) / PAGE_SIZE
}

// ============================================================================
// Error types
// ============================================================================

/// DMA pool errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// Page budget exhausted or the allocator returned nothing.
    OutOfMemory,
    /// The mapper could not produce a bus address.
    MapFailed,
    /// Requested a zero-length buffer.
    ZeroLength,
    /// Buffer does not fit in one page.
    TooLarge {
        /// Requested size in bytes.
        requested: usize,
    },
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "DMA pool out of memory"),
            Self::MapFailed => write!(f, "DMA mapping failed"),
            Self::ZeroLength => write!(f, "Zero-length DMA buffer"),
            Self::TooLarge { requested } => {
                write!(f, "DMA buffer of {} bytes exceeds page size", requested)
            }
        }
    }
}

/// Result type for DMA operations.
pub type Result<T> = core::result::Result<T, DmaError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_functions() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_down(4097, 4096), 4096);
    }

    #[test]
    fn test_page_conversions() {
        assert_eq!(pages_to_bytes(3), 3 * PAGE_SIZE);
        assert_eq!(bytes_to_pages(1), 1);
        assert_eq!(bytes_to_pages(PAGE_SIZE + 1), 2);
        assert_eq!(HALF_PAGE * 2, PAGE_SIZE);
    }

    #[test]
    fn test_error_display() {
        let msg = format!("{}", DmaError::TooLarge { requested: 9000 });
        assert!(msg.contains("9000"));
    }
}
