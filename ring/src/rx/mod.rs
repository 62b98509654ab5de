//! Receive queue and completion poller.
//!
//! # Poll pass
//! ```text
//!   on_interrupt(): mask irq ──> schedule poll
//!
//!   poll(budget):
//!     while completed < budget and reclaim() yields a slot:
//!         error?        count, drop partial frame
//!         otherwise     sync for cpu, fragment, deliver on LAST
//!         try_reuse()   flip half -> recycle to next_to_alloc
//!                       else      -> unmap, slot EMPTY
//!         every refill_batch vacated slots: refill
//!     completed < budget  -> refill, unmask irq, Exhausted
//!     completed == budget -> BudgetReached (irq stays masked)
//! ```
//!
//! Refill posts recycled buffers first, then fresh pages. With a rate limit
//! each post costs one token; an empty bucket stops the refill until
//! [`RxQueue::on_tick`] adds tokens.

mod frame;

pub use frame::{FrameSink, RxFrame, MAX_FRAGMENTS};

use dma_pool::{BufferPool, DmaMapper, RxBuffer};
use log::{debug, info, trace};

use crate::config::{check_rate_limit, IrqMode, RateLimit, RingConfig};
use crate::desc::{CompletionStatus, DescFlags, Descriptor};
use crate::error::{Result, RingError};
use crate::hw::DescriptorPort;
use crate::limiter::TokenBucket;
use crate::poll::{PollOutcome, PollReport};
use crate::ring::{Completed, DescriptorRing};
use crate::stats::RxStats;
use frame::Assembler;

fn rx_descriptor(buf: &RxBuffer, flags: DescFlags) -> Result<Descriptor> {
    Descriptor::new(buf.bus_addr(), buf.capacity(), flags)
}

/// Receive side of one MAC.
pub struct RxQueue<P: DescriptorPort, M: DmaMapper> {
    ring: DescriptorRing<RxBuffer, P>,
    pool: BufferPool<M>,
    config: RingConfig,
    limiter: Option<TokenBucket>,
    /// Last refill stopped on an empty bucket.
    throttled: bool,
    assembler: Assembler,
    stats: RxStats,
    closed: bool,
}

impl<P: DescriptorPort, M: DmaMapper> RxQueue<P, M> {
    /// Bring the receive ring up.
    ///
    /// Validates `config`, enables the DMA engine, posts as many buffers as
    /// the pool (and rate limit) allow and unmasks the interrupt. Posting no
    /// buffer at all is a hard failure.
    pub fn open(config: RingConfig, port: P, pool: BufferPool<M>) -> Result<Self> {
        config.validate()?;

        let ring = DescriptorRing::new(config.rx_ring_size as usize, port)?;
        let limiter = config
            .rate_limit
            .map(|limit| TokenBucket::from_rate(limit, config.tick_ms));

        let mut queue = Self {
            ring,
            pool,
            config,
            limiter,
            throttled: false,
            assembler: Assembler::default(),
            stats: RxStats::default(),
            closed: false,
        };

        queue.ring.port_mut().enable()?;

        let posted = queue.refill(true);
        if posted == 0 {
            if let Err(err) = queue.ring.port_mut().disable() {
                debug!("rx: disable after failed open: {}", err);
            }
            queue.closed = true;
            return Err(RingError::OutOfBuffers);
        }

        queue.ring.port_mut().set_interrupt(true);
        info!(
            "rx: ring up, {} slots, {} buffers posted, {:?}",
            queue.ring.capacity(),
            posted,
            queue.config.irq_mode
        );
        Ok(queue)
    }

    /// Completion interrupt: mask it and ask for a poll.
    pub fn on_interrupt(&mut self) -> bool {
        self.ring.port_mut().set_interrupt(false);
        true
    }

    /// Drain up to `budget` completed descriptors into `sink`.
    pub fn poll<S: FrameSink + ?Sized>(&mut self, budget: usize, sink: &mut S) -> PollReport {
        let batch = self.config.refill_batch as usize;
        let mut completed = 0;
        let mut vacated = 0;

        while completed < budget {
            let mut done = match self.ring.reclaim() {
                Some(done) => done,
                None => break,
            };
            completed += 1;
            self.stats.descriptors += 1;

            self.receive(&done, sink);

            if self.pool.try_reuse(done.buffer_mut()) {
                match self.ring.recycle(done) {
                    Ok(()) => self.stats.pages_reused += 1,
                    Err(buf) => {
                        self.pool.release(buf);
                        self.stats.pages_released += 1;
                    }
                }
            } else {
                let buf = self.ring.retire(done);
                self.pool.release(buf);
                self.stats.pages_released += 1;
            }

            vacated += 1;
            if vacated >= batch {
                self.refill(false);
                vacated = 0;
            }
        }

        let outcome = if completed < budget {
            self.refill(true);
            self.ring.port_mut().set_interrupt(true);
            PollOutcome::Exhausted
        } else {
            PollOutcome::BudgetReached
        };

        trace!(
            "rx: poll {}/{} {:?}, {} posted",
            completed,
            budget,
            outcome,
            self.ring.outstanding()
        );
        PollReport { completed, outcome }
    }

    /// Account one completion and feed the assembler.
    fn receive<S: FrameSink + ?Sized>(&mut self, done: &Completed<RxBuffer>, sink: &mut S) {
        let completion = done.completion();
        let status = completion.status;
        let last = status.contains(CompletionStatus::LAST);

        if completion.is_error() {
            self.stats.errors += 1;
            if status.contains(CompletionStatus::CRC_ERR) {
                self.stats.crc_errors += 1;
            }
            if status.contains(CompletionStatus::FRAME_ERR) {
                self.stats.frame_errors += 1;
            }
            if status.contains(CompletionStatus::OVERRUN) {
                self.stats.overruns += 1;
            }
            self.assembler.discard(!last);
            return;
        }

        if status.contains(CompletionStatus::FIRST) {
            if self.assembler.in_frame() {
                // Previous frame never saw its LAST.
                self.drop_frame(false);
            } else {
                self.assembler.discard(false);
            }
        } else if !self.assembler.in_frame() {
            if self.assembler.dropping() {
                if last {
                    self.assembler.discard(false);
                }
            } else {
                self.drop_frame(!last);
            }
            return;
        }

        let len = completion.len as usize;
        self.pool.sync_for_cpu(done.buffer(), len);
        if !self.assembler.push(self.pool.fragment(done.buffer(), len)) {
            self.drop_frame(!last);
            return;
        }

        if last {
            let frame = self.assembler.take();
            self.stats.packets += 1;
            self.stats.bytes += frame.len() as u64;
            sink.deliver(frame);
        }
    }

    fn drop_frame(&mut self, skip_rest: bool) {
        self.stats.errors += 1;
        self.stats.frame_errors += 1;
        self.assembler.discard(skip_rest);
    }

    fn desc_flags(&self) -> DescFlags {
        match self.config.irq_mode {
            IrqMode::PerDescriptor => DescFlags::IRQ,
            IrqMode::PerPacket => DescFlags::empty(),
        }
    }

    /// Post buffers into unused slots; returns how many were posted.
    ///
    /// Without a limiter, an unforced refill waits until a full batch of
    /// slots is free. Stops early on an empty bucket or allocation failure.
    fn refill(&mut self, force: bool) -> usize {
        let unused = self.ring.capacity_unused();
        if unused == 0 {
            return 0;
        }
        if self.limiter.is_none() && !force && unused < self.config.refill_batch as usize {
            return 0;
        }

        let flags = self.desc_flags();
        let mut posted = 0;
        self.throttled = false;

        while self.ring.capacity_unused() > 0 {
            if let Some(bucket) = self.limiter.as_mut() {
                if !bucket.try_spend(1) {
                    self.throttled = true;
                    self.stats.throttled += 1;
                    debug!("rx: refill throttled after {} posts", posted);
                    break;
                }
            }

            let result = if self.ring.next_is_filled() {
                self.ring.post_filled_with(|buf| rx_descriptor(buf, flags))
            } else {
                match self.pool.acquire_page() {
                    Ok(buf) => self.post_fresh(buf, flags),
                    Err(err) => {
                        self.stats.alloc_failed += 1;
                        debug!("rx: buffer allocation failed: {}", err);
                        Err(err.into())
                    }
                }
            };

            match result {
                Ok(_) => posted += 1,
                Err(_) => {
                    if let Some(bucket) = self.limiter.as_mut() {
                        bucket.refund(1);
                    }
                    break;
                }
            }
        }
        posted
    }

    fn post_fresh(&mut self, buf: RxBuffer, flags: DescFlags) -> Result<u16> {
        let desc = match rx_descriptor(&buf, flags) {
            Ok(desc) => desc,
            Err(err) => {
                self.pool.release(buf);
                return Err(err);
            }
        };
        self.ring.post(buf, desc).map_err(|err| {
            let kind = err.kind;
            self.pool.release(err.into_buffer());
            kind
        })
    }

    /// Rate limiter tick.
    ///
    /// Returns `true` when the last refill was throttled and tokens are now
    /// available; the caller should schedule a poll.
    pub fn on_tick(&mut self, ticks: u32) -> bool {
        match self.limiter.as_mut() {
            Some(bucket) => {
                bucket.refill(ticks);
                self.throttled && bucket.tokens() > 0
            }
            None => false,
        }
    }

    /// Change the receive rate limit at runtime.
    ///
    /// Enabling a limit requires [`IrqMode::PerDescriptor`] to be in effect.
    pub fn set_rate_limit(&mut self, limit: Option<RateLimit>) -> Result<()> {
        match limit {
            Some(limit) => {
                check_rate_limit(limit, self.config.irq_mode)?;
                self.limiter = Some(TokenBucket::from_rate(limit, self.config.tick_ms));
                info!("rx: rate limit {} pps, burst {}", limit.pps, limit.burst);
            }
            None => {
                self.limiter = None;
                self.throttled = false;
                info!("rx: rate limit off");
            }
        }
        self.config.rate_limit = limit;
        Ok(())
    }

    /// Change the completion interrupt mode for future posts.
    ///
    /// Leaving [`IrqMode::PerDescriptor`] is refused while a rate limit is set.
    pub fn set_irq_mode(&mut self, mode: IrqMode) -> Result<()> {
        if let Some(limit) = self.config.rate_limit {
            check_rate_limit(limit, mode)?;
        }
        self.config.irq_mode = mode;
        Ok(())
    }

    /// Counters so far.
    pub fn stats(&self) -> RxStats {
        let mut stats = self.stats;
        stats.completion_anomalies = self.ring.anomalies();
        stats
    }

    /// Active configuration.
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// The descriptor ring.
    pub fn ring(&self) -> &DescriptorRing<RxBuffer, P> {
        &self.ring
    }

    /// The buffer pool.
    pub fn pool(&self) -> &BufferPool<M> {
        &self.pool
    }

    /// The rate limiter, when enabled.
    pub fn limiter(&self) -> Option<&TokenBucket> {
        self.limiter.as_ref()
    }

    fn release_all(&mut self) {
        for buf in self.ring.drain() {
            self.pool.release(buf);
        }
        self.assembler.discard(false);
    }

    /// Stop the DMA engine and free every buffer.
    ///
    /// Buffers are unmapped and released even when the disable handshake
    /// fails; the handshake error is returned afterwards.
    pub fn close(mut self) -> Result<RxStats> {
        self.closed = true;
        self.ring.port_mut().set_interrupt(false);
        let disabled = self.ring.port_mut().disable();
        self.release_all();

        let stats = self.stats();
        info!(
            "rx: ring down, {} packets, {} errors, {} pages live",
            stats.packets,
            stats.errors,
            self.pool.live_pages()
        );
        disabled.map(|_| stats)
    }
}

impl<P: DescriptorPort, M: DmaMapper> Drop for RxQueue<P, M> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.ring.port_mut().set_interrupt(false);
        if let Err(err) = self.ring.port_mut().disable() {
            debug!("rx: disable on drop: {}", err);
        }
        self.release_all();
    }
}
