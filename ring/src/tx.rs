//! Transmit queue.
//!
//! Frames are copied into pool pages, posted one descriptor per frame and
//! released when the device reports completion. The queue stops when the
//! ring fills and wakes once a quarter of it is free again.
//!
//! [`SharedTxQueue`] lets the send path and the completion path run in
//! different contexts; every operation takes the per-ring lock.

use alloc::sync::Arc;
use core::fmt;

use dma_pool::{BufferPool, DmaMapper, TxBuffer, PAGE_SIZE};
use log::{debug, info, trace};
use spin::Mutex;

use crate::config::RingConfig;
use crate::desc::{DescFlags, Descriptor, MAX_DESC_LEN};
use crate::error::Result;
use crate::hw::DescriptorPort;
use crate::poll::{PollOutcome, PollReport};
use crate::ring::DescriptorRing;
use crate::stats::TxStats;

/// Largest frame a single transmit descriptor carries.
pub const MAX_TX_FRAME: usize = if PAGE_SIZE < MAX_DESC_LEN as usize {
    PAGE_SIZE
} else {
    MAX_DESC_LEN as usize
};

/// TX error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    /// TX queue is full, try again after completions collected.
    QueueFull,
    /// Frame too large for one descriptor.
    FrameTooLarge,
    /// Zero-length frame.
    EmptyFrame,
    /// No DMA buffer available, try again later.
    NoBuffer,
    /// Queue has been shut down.
    DeviceNotReady,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "Transmit queue full"),
            Self::FrameTooLarge => write!(f, "Frame exceeds {} bytes", MAX_TX_FRAME),
            Self::EmptyFrame => write!(f, "Empty frame"),
            Self::NoBuffer => write!(f, "No transmit buffer available"),
            Self::DeviceNotReady => write!(f, "Transmit queue is down"),
        }
    }
}

/// Transmit side of one MAC.
pub struct TxQueue<P: DescriptorPort, M: DmaMapper> {
    ring: DescriptorRing<TxBuffer, P>,
    pool: BufferPool<M>,
    stopped: bool,
    closed: bool,
    wake_threshold: usize,
    stats: TxStats,
}

impl<P: DescriptorPort, M: DmaMapper> TxQueue<P, M> {
    /// Bring the transmit ring up and unmask its interrupt.
    pub fn open(config: RingConfig, port: P, pool: BufferPool<M>) -> Result<Self> {
        config.validate()?;

        let mut ring = DescriptorRing::new(config.tx_ring_size as usize, port)?;
        ring.port_mut().enable()?;
        ring.port_mut().set_interrupt(true);

        let wake_threshold = (ring.capacity() / 4).max(1);
        info!("tx: ring up, {} slots", ring.capacity());
        Ok(Self {
            ring,
            pool,
            stopped: false,
            closed: false,
            wake_threshold,
            stats: TxStats::default(),
        })
    }

    /// Whether `transmit` is currently accepted.
    pub fn can_transmit(&self) -> bool {
        !self.stopped && self.ring.capacity_unused() > 0
    }

    /// Whether the queue is stopped waiting for completions.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Copy `frame` into a DMA buffer and post it.
    ///
    /// Returns immediately; completion is collected by [`clean`](Self::clean).
    pub fn transmit(&mut self, frame: &[u8]) -> core::result::Result<(), TxError> {
        if self.closed {
            return Err(TxError::DeviceNotReady);
        }
        if frame.is_empty() {
            return Err(TxError::EmptyFrame);
        }
        if frame.len() > MAX_TX_FRAME {
            return Err(TxError::FrameTooLarge);
        }
        if !self.can_transmit() {
            self.stopped = true;
            self.stats.busy += 1;
            return Err(TxError::QueueFull);
        }

        let buf = self.pool.alloc_tx(frame).map_err(|err| {
            debug!("tx: buffer allocation failed: {}", err);
            self.stats.alloc_failed += 1;
            TxError::NoBuffer
        })?;
        let desc = Descriptor::new(
            buf.bus_addr(),
            buf.len(),
            DescFlags::FIRST | DescFlags::LAST | DescFlags::IRQ,
        );
        let desc = match desc {
            Ok(desc) => desc,
            Err(_) => {
                self.pool.release_tx(buf);
                return Err(TxError::FrameTooLarge);
            }
        };

        if let Err(err) = self.ring.post(buf, desc) {
            self.pool.release_tx(err.into_buffer());
            self.stopped = true;
            self.stats.busy += 1;
            return Err(TxError::QueueFull);
        }

        if self.ring.capacity_unused() == 0 {
            trace!("tx: ring full, stopping queue");
            self.stopped = true;
        }
        Ok(())
    }

    /// Completion interrupt: mask it and ask for a clean pass.
    pub fn on_interrupt(&mut self) -> bool {
        self.ring.port_mut().set_interrupt(false);
        true
    }

    /// Release up to `budget` completed transmit buffers.
    pub fn clean(&mut self, budget: usize) -> PollReport {
        let mut completed = 0;
        while completed < budget {
            let done = match self.ring.reclaim() {
                Some(done) => done,
                None => break,
            };
            let completion = done.completion();
            let buf = self.ring.retire(done);
            if completion.is_error() {
                self.stats.errors += 1;
            } else {
                self.stats.packets += 1;
                self.stats.bytes += buf.len() as u64;
            }
            self.pool.release_tx(buf);
            completed += 1;
        }

        if self.stopped && !self.closed && self.ring.capacity_unused() >= self.wake_threshold {
            trace!("tx: waking queue, {} free", self.ring.capacity_unused());
            self.stopped = false;
        }

        let outcome = if completed < budget {
            if !self.closed {
                self.ring.port_mut().set_interrupt(true);
            }
            PollOutcome::Exhausted
        } else {
            PollOutcome::BudgetReached
        };
        PollReport { completed, outcome }
    }

    /// Counters so far.
    pub fn stats(&self) -> TxStats {
        let mut stats = self.stats;
        stats.completion_anomalies = self.ring.anomalies();
        stats
    }

    /// The descriptor ring.
    pub fn ring(&self) -> &DescriptorRing<TxBuffer, P> {
        &self.ring
    }

    /// The buffer pool.
    pub fn pool(&self) -> &BufferPool<M> {
        &self.pool
    }

    fn release_all(&mut self) {
        for buf in self.ring.drain() {
            self.pool.release_tx(buf);
        }
    }

    /// Disable the engine and free every in-flight buffer. Later transmits
    /// fail with [`TxError::DeviceNotReady`].
    pub fn shutdown(&mut self) -> Result<TxStats> {
        self.closed = true;
        self.stopped = true;
        self.ring.port_mut().set_interrupt(false);
        let disabled = self.ring.port_mut().disable();
        self.release_all();

        let stats = self.stats();
        info!(
            "tx: ring down, {} packets, {} errors",
            stats.packets, stats.errors
        );
        disabled.map(|_| stats)
    }

    /// Shut down and consume the queue.
    pub fn close(mut self) -> Result<TxStats> {
        self.shutdown()
    }
}

impl<P: DescriptorPort, M: DmaMapper> Drop for TxQueue<P, M> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.ring.port_mut().set_interrupt(false);
        if let Err(err) = self.ring.port_mut().disable() {
            debug!("tx: disable on drop: {}", err);
        }
        self.release_all();
    }
}

/// Transmit queue shared between the send path and the cleaner.
pub struct SharedTxQueue<P: DescriptorPort, M: DmaMapper> {
    inner: Arc<Mutex<TxQueue<P, M>>>,
}

impl<P: DescriptorPort, M: DmaMapper> SharedTxQueue<P, M> {
    /// Share `queue`.
    pub fn new(queue: TxQueue<P, M>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    /// See [`TxQueue::transmit`].
    pub fn transmit(&self, frame: &[u8]) -> core::result::Result<(), TxError> {
        self.inner.lock().transmit(frame)
    }

    /// See [`TxQueue::clean`].
    pub fn clean(&self, budget: usize) -> PollReport {
        self.inner.lock().clean(budget)
    }

    /// See [`TxQueue::on_interrupt`].
    pub fn on_interrupt(&self) -> bool {
        self.inner.lock().on_interrupt()
    }

    /// See [`TxQueue::is_stopped`].
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().is_stopped()
    }

    /// See [`TxQueue::stats`].
    pub fn stats(&self) -> TxStats {
        self.inner.lock().stats()
    }

    /// Run `f` with the queue locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut TxQueue<P, M>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }

    /// See [`TxQueue::shutdown`]. Affects every clone.
    pub fn shutdown(&self) -> Result<TxStats> {
        self.inner.lock().shutdown()
    }
}

impl<P: DescriptorPort, M: DmaMapper> Clone for SharedTxQueue<P, M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
