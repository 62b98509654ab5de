//! Buffer pool management.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use crate::buffer::{RxBuffer, TxBuffer};
use crate::mapping::{Direction, DmaMapper};
use crate::page::{DmaPage, Half, PageFragment};
use crate::{DmaError, Result, HALF_PAGE, PAGE_SIZE};

/// Bounded source of DMA pages for one or more rings.
///
/// Pages stay counted against `max_pages` until their memory is freed, which
/// may be after the ring released them if a consumer still holds a fragment.
pub struct BufferPool<M: DmaMapper> {
    mapper: M,
    max_pages: usize,
    live: Arc<AtomicUsize>,
}

impl<M: DmaMapper> BufferPool<M> {
    /// Create a pool that keeps at most `max_pages` pages alive.
    pub fn new(mapper: M, max_pages: usize) -> Self {
        Self {
            mapper,
            max_pages,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The mapping service.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Page budget.
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Pages currently allocated (ring-held or consumer-held).
    pub fn live_pages(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Reserve one page against the budget.
    fn reserve(&self) -> Result<()> {
        let max = self.max_pages;
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < max {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .map(|_| ())
            .map_err(|_| DmaError::OutOfMemory)
    }

    fn new_page(&self) -> Result<DmaPage> {
        self.reserve()?;
        match DmaPage::allocate(Some(self.live.clone())) {
            Some(page) => Ok(page),
            None => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                Err(DmaError::OutOfMemory)
            }
        }
    }

    /// Allocate and map a fresh receive page, lower half active.
    ///
    /// Failure is expected under memory pressure; callers stop filling and
    /// retry on the next cycle.
    pub fn acquire_page(&self) -> Result<RxBuffer> {
        let page = self.new_page()?;
        let bus = self
            .mapper
            .map(page.cpu_ptr(), PAGE_SIZE, Direction::FromDevice)
            .map_err(|err| {
                debug!("dma-pool: rx page map failed: {}", err);
                err
            })?;
        Ok(RxBuffer {
            page: Arc::new(page),
            bus,
            half: Half::Lower,
        })
    }

    /// Flip `buf` to its other half if no consumer still holds that half.
    ///
    /// On success the new half is synced for the device and `true` is
    /// returned. On `false` the caller must [`release`](Self::release) it.
    pub fn try_reuse(&self, buf: &mut RxBuffer) -> bool {
        let next = buf.half.other();
        if buf.page.holders(next) != 0 {
            return false;
        }
        buf.half = next;
        self.mapper
            .sync_for_device(buf.bus_addr(), HALF_PAGE, Direction::FromDevice);
        true
    }

    /// Unmap a receive page and drop the ring's reference to it.
    pub fn release(&self, buf: RxBuffer) {
        self.mapper.unmap(buf.bus, PAGE_SIZE, Direction::FromDevice);
    }

    /// Make `len` received bytes of the active half visible to the CPU.
    pub fn sync_for_cpu(&self, buf: &RxBuffer, len: usize) {
        self.mapper
            .sync_for_cpu(buf.bus_addr(), len.min(HALF_PAGE), Direction::FromDevice);
    }

    /// Hand out the first `len` bytes of the active half.
    pub fn fragment(&self, buf: &RxBuffer, len: usize) -> PageFragment {
        PageFragment::new(buf.page.clone(), buf.half, len.min(HALF_PAGE))
    }

    /// Copy `frame` into a new page mapped for the device to read.
    pub fn alloc_tx(&self, frame: &[u8]) -> Result<TxBuffer> {
        if frame.is_empty() {
            return Err(DmaError::ZeroLength);
        }
        if frame.len() > PAGE_SIZE {
            return Err(DmaError::TooLarge {
                requested: frame.len(),
            });
        }

        let page = self.new_page()?;
        // SAFETY: the page is not mapped yet, nobody else can see it.
        unsafe { page.slice_mut(0, frame.len()) }.copy_from_slice(frame);

        let bus = self
            .mapper
            .map(page.cpu_ptr(), frame.len(), Direction::ToDevice)?;
        self.mapper
            .sync_for_device(bus, frame.len(), Direction::ToDevice);

        Ok(TxBuffer {
            page,
            bus,
            len: frame.len(),
        })
    }

    /// Unmap and free a transmit buffer after completion.
    pub fn release_tx(&self, buf: TxBuffer) {
        self.mapper.unmap(buf.bus, buf.len, Direction::ToDevice);
    }
}
