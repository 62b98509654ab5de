//! Ring configuration.
//!
//! Everything the administrative interface can change: ring sizes, refill
//! batching, interrupt completion mode and the receive pps limit.
//!
//! # Interrupt mode and rate limiting
//!
//! The pps limiter accounts tokens per posted descriptor, so the hardware
//! must signal completion per descriptor. Enabling rate limiting therefore
//! requires [`IrqMode::PerDescriptor`]; any other combination is rejected.

use crate::error::{Result, RingError};
use crate::ring::{MAX_RING_SIZE, MIN_RING_SIZE};

/// Default number of slots per ring.
pub const DEFAULT_RING_SIZE: u16 = 256;

/// Vacated slots collected before descriptors are written back.
pub const DEFAULT_REFILL_BATCH: u16 = 16;

/// Rate limiter tick period.
pub const DEFAULT_TICK_MS: u32 = 100;

/// Register reads before a handshake is declared dead.
pub const DEFAULT_HANDSHAKE_RETRIES: u32 = 1000;

/// Completion interrupt signalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    /// Interrupt after every completed descriptor.
    PerDescriptor,
    /// Interrupt once per completed packet.
    PerPacket,
}

/// Receive packets-per-second limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Sustained packets per second.
    pub pps: u32,
    /// Largest burst admitted after an idle period.
    pub burst: u32,
}

impl RateLimit {
    /// Limit with a burst of one tick's worth of packets.
    pub const fn pps(pps: u32) -> Self {
        Self { pps, burst: 0 }
    }
}

/// Configuration for one MAC's receive and transmit rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Receive ring slots.
    pub rx_ring_size: u16,
    /// Transmit ring slots.
    pub tx_ring_size: u16,
    /// Minimum vacated slots before an unthrottled refill.
    pub refill_batch: u16,
    /// Rate limiter tick period in milliseconds.
    pub tick_ms: u32,
    /// Completion interrupt mode.
    pub irq_mode: IrqMode,
    /// Receive rate limit; `None` disables the limiter.
    pub rate_limit: Option<RateLimit>,
    /// Handshake register reads before timing out.
    pub handshake_retries: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            rx_ring_size: DEFAULT_RING_SIZE,
            tx_ring_size: DEFAULT_RING_SIZE,
            refill_batch: DEFAULT_REFILL_BATCH,
            tick_ms: DEFAULT_TICK_MS,
            irq_mode: IrqMode::PerPacket,
            rate_limit: None,
            handshake_retries: DEFAULT_HANDSHAKE_RETRIES,
        }
    }
}

impl RingConfig {
    /// Enable the receive rate limiter, switching to per-descriptor
    /// interrupts as the hardware requires.
    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.irq_mode = IrqMode::PerDescriptor;
        self.rate_limit = Some(limit);
        self
    }

    /// Check every field and the interrupt-mode coupling.
    pub fn validate(&self) -> Result<()> {
        check_ring_size(self.rx_ring_size as usize)?;
        check_ring_size(self.tx_ring_size as usize)?;

        if self.refill_batch == 0 {
            return Err(RingError::InvalidConfig("refill batch must be non-zero"));
        }
        if self.refill_batch >= self.rx_ring_size {
            return Err(RingError::InvalidConfig(
                "refill batch must be smaller than the rx ring",
            ));
        }
        if self.tick_ms == 0 {
            return Err(RingError::InvalidConfig("tick period must be non-zero"));
        }
        if self.handshake_retries == 0 {
            return Err(RingError::InvalidConfig("handshake retries must be non-zero"));
        }
        if let Some(limit) = self.rate_limit {
            check_rate_limit(limit, self.irq_mode)?;
        }
        Ok(())
    }
}

pub(crate) fn check_ring_size(size: usize) -> Result<()> {
    if (MIN_RING_SIZE..=MAX_RING_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(RingError::InvalidRingSize(size))
    }
}

pub(crate) fn check_rate_limit(limit: RateLimit, mode: IrqMode) -> Result<()> {
    if limit.pps == 0 {
        return Err(RingError::InvalidConfig("rate limit must be non-zero"));
    }
    if mode != IrqMode::PerDescriptor {
        return Err(RingError::InvalidConfig(
            "rate limiting requires per-descriptor interrupts",
        ));
    }
    Ok(())
}
