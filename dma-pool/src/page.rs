//! DMA pages and consumer-held fragments.
//!
//! # Ownership
//! ```text
//!   RxBuffer (ring)  ──Arc──┐
//!                           ├──> DmaPage { memory, holders[lower], holders[upper] }
//!   PageFragment (frame) ─Arc┘          ▲ incremented while a fragment lives
//! ```
//!
//! The memory is freed when the last `Arc<DmaPage>` drops. The per-half
//! holder counts decide whether the ring may hand a half back to the device.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::sync::Arc;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{HALF_PAGE, PAGE_SIZE};

/// One half of a receive page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    /// Bytes `0..HALF_PAGE`.
    Lower,
    /// Bytes `HALF_PAGE..PAGE_SIZE`.
    Upper,
}

impl Half {
    /// Byte offset of this half within the page.
    #[inline]
    pub const fn offset(self) -> usize {
        match self {
            Half::Lower => 0,
            Half::Upper => HALF_PAGE,
        }
    }

    /// The opposite half.
    #[inline]
    pub const fn other(self) -> Half {
        match self {
            Half::Lower => Half::Upper,
            Half::Upper => Half::Lower,
        }
    }

    #[inline]
    const fn slot(self) -> usize {
        match self {
            Half::Lower => 0,
            Half::Upper => 1,
        }
    }
}

/// A page-aligned, zeroed page of DMA memory.
pub struct DmaPage {
    ptr: NonNull<u8>,
    holders: [AtomicUsize; 2],
    /// Pool-wide live page counter, decremented on drop.
    live: Option<Arc<AtomicUsize>>,
}

#[inline]
fn page_layout() -> Layout {
    // PAGE_SIZE is a non-zero power of two.
    unsafe { Layout::from_size_align_unchecked(PAGE_SIZE, PAGE_SIZE) }
}

impl DmaPage {
    /// Allocate a zeroed page.
    ///
    /// Returns `None` when the allocator is exhausted. `live` must already
    /// account for this page; it is decremented when the page is freed.
    pub(crate) fn allocate(live: Option<Arc<AtomicUsize>>) -> Option<Self> {
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(page_layout()) };
        let ptr = NonNull::new(raw)?;
        Some(Self {
            ptr,
            holders: [AtomicUsize::new(0), AtomicUsize::new(0)],
            live,
        })
    }

    /// CPU pointer to the start of the page.
    #[inline]
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Number of live fragments referencing `half`.
    #[inline]
    pub fn holders(&self, half: Half) -> usize {
        self.holders[half.slot()].load(Ordering::Acquire)
    }

    #[inline]
    fn hold(&self, half: Half) {
        self.holders[half.slot()].fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    fn unhold(&self, half: Half) {
        let prev = self.holders[half.slot()].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "fragment holder count underflow");
    }

    /// View `len` bytes starting at `offset`.
    ///
    /// # Safety
    /// The range must not be owned by the device for the lifetime of the
    /// returned slice, and `offset + len <= PAGE_SIZE`.
    #[inline]
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= PAGE_SIZE);
        core::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len)
    }

    /// Mutable view of `len` bytes starting at `offset`.
    ///
    /// # Safety
    /// Same as [`DmaPage::slice`], plus no other view of the range may exist.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= PAGE_SIZE);
        core::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len)
    }
}

impl Drop for DmaPage {
    fn drop(&mut self) {
        // SAFETY: ptr came from alloc_zeroed with the same layout.
        unsafe { dealloc(self.ptr.as_ptr(), page_layout()) };
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl fmt::Debug for DmaPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaPage")
            .field("ptr", &self.ptr)
            .field("lower", &self.holders(Half::Lower))
            .field("upper", &self.holders(Half::Upper))
            .finish()
    }
}

// SAFETY: the page is plain memory; access to each half is arbitrated by the
// holder counts and the ring's slot ownership.
unsafe impl Send for DmaPage {}
unsafe impl Sync for DmaPage {}

/// Read-only view of received bytes inside one half of a page.
///
/// While a fragment is alive its half is never reposted to the device.
pub struct PageFragment {
    page: Arc<DmaPage>,
    half: Half,
    len: usize,
}

impl PageFragment {
    pub(crate) fn new(page: Arc<DmaPage>, half: Half, len: usize) -> Self {
        debug_assert!(len <= HALF_PAGE);
        page.hold(half);
        Self { page, half, len }
    }

    /// Received bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the holder count keeps this half away from the device.
        unsafe { self.page.slice(self.half.offset(), self.len) }
    }

    /// Number of valid bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the fragment carries no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Which half of the page this fragment covers.
    #[inline]
    pub fn half(&self) -> Half {
        self.half
    }

    /// Byte range within the backing page.
    #[inline]
    pub fn page_range(&self) -> core::ops::Range<usize> {
        self.half.offset()..self.half.offset() + self.len
    }

    /// Whether both fragments share a backing page.
    pub fn same_page(&self, other: &PageFragment) -> bool {
        Arc::ptr_eq(&self.page, &other.page)
    }
}

impl Clone for PageFragment {
    fn clone(&self) -> Self {
        PageFragment::new(self.page.clone(), self.half, self.len)
    }
}

impl Drop for PageFragment {
    fn drop(&mut self) {
        self.page.unhold(self.half);
    }
}

impl fmt::Debug for PageFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFragment")
            .field("half", &self.half)
            .field("len", &self.len)
            .finish()
    }
}
