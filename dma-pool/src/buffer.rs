//! Ring-held buffer handles.
//!
//! # State Machine
//! ```text
//!   acquire_page() ──> RxBuffer(Lower) ──post──> device ──complete──┐
//!        ▲                    ▲                                     │
//!        │                    └──── try_reuse(): flip half ◄────────┤
//!        └──────────── release(): unmap, drop ref ◄─────────────────┘
//! ```

use alloc::sync::Arc;
use core::fmt;

use crate::mapping::BusAddr;
use crate::page::{DmaPage, Half};
use crate::HALF_PAGE;

/// Receive buffer: one half of a mapped page.
pub struct RxBuffer {
    pub(crate) page: Arc<DmaPage>,
    /// Bus address of the page start.
    pub(crate) bus: BusAddr,
    pub(crate) half: Half,
}

impl RxBuffer {
    /// Bus address of the active half, as written into a descriptor.
    #[inline]
    pub fn bus_addr(&self) -> BusAddr {
        self.bus.offset(self.half.offset())
    }

    /// Active half.
    #[inline]
    pub fn half(&self) -> Half {
        self.half
    }

    /// Usable bytes in the active half.
    #[inline]
    pub fn capacity(&self) -> usize {
        HALF_PAGE
    }

    /// Byte range of the active half within the page.
    #[inline]
    pub fn page_range(&self) -> core::ops::Range<usize> {
        self.half.offset()..self.half.offset() + HALF_PAGE
    }

    /// Backing page.
    #[inline]
    pub fn page(&self) -> &Arc<DmaPage> {
        &self.page
    }
}

impl fmt::Debug for RxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxBuffer")
            .field("bus", &self.bus)
            .field("half", &self.half)
            .finish()
    }
}

/// Transmit buffer: one outbound frame copied into a mapped page.
pub struct TxBuffer {
    pub(crate) page: DmaPage,
    pub(crate) bus: BusAddr,
    pub(crate) len: usize,
}

impl TxBuffer {
    /// Bus address of the frame.
    #[inline]
    pub fn bus_addr(&self) -> BusAddr {
        self.bus
    }

    /// Frame length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the frame is empty (never true for pool-built buffers).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Frame bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the device only reads this range.
        unsafe { self.page.slice(0, self.len) }
    }
}

impl fmt::Debug for TxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxBuffer")
            .field("bus", &self.bus)
            .field("len", &self.len)
            .finish()
    }
}
