//! CPU MAC descriptor ring manager.
//!
//! Fixed-capacity rings of hardware buffer descriptors shared between
//! software (fill, reclaim) and a DMA engine (drain, complete).
//!
//! # Architecture
//!
//! The implementation is layered, leaves first:
//! 1. **Buffer pool** - `dma_pool` pages with half-page reuse
//! 2. **Descriptor ring** - slots, ownership tags and the cursor triple
//! 3. **Rate limiter** - token bucket gating receive refills
//! 4. **Completion poller** - budgeted drain, recycle, refill, re-arm
//!
//! Hardware is reached only through the [`hw::DescriptorPort`] capability
//! trait, so the same rings run against MMIO registers, a simulator, or a
//! test double.
//!
//! # Usage
//!
//! ```ignore
//! use cpumac_ring::{RingConfig, RxQueue, PollOutcome};
//! use cpumac_ring::hw::{MmioPort, RingRegs};
//! use dma_pool::{BufferPool, IdentityMapper};
//!
//! let config = RingConfig::default();
//! let port = MmioPort::new(regs.clone(), RingRegs::RX, config.handshake_retries);
//! let mut rx = RxQueue::open(config, port, BufferPool::new(IdentityMapper, 512))?;
//!
//! // interrupt bottom half:
//! if rx.on_interrupt() {
//!     let report = rx.poll(64, &mut |frame| stack.input(frame));
//!     if report.outcome == PollOutcome::BudgetReached {
//!         reschedule();
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod desc;
pub mod error;
pub mod hw;
pub mod limiter;
pub mod poll;
pub mod ring;
pub mod rx;
pub mod stats;
pub mod tx;

pub use config::{IrqMode, RateLimit, RingConfig};
pub use desc::{Completion, CompletionStatus, DescFlags, Descriptor};
pub use error::{Result, RingError};
pub use limiter::TokenBucket;
pub use poll::{PollOutcome, PollReport};
pub use ring::{Completed, DescriptorRing, PostError, SlotState};
pub use rx::{FrameSink, RxFrame, RxQueue};
pub use stats::{RxStats, TxStats};
pub use tx::{SharedTxQueue, TxError, TxQueue};
