//! Ring statistics.
//!
//! Plain counters, updated only by the queue owner. Readers copy the
//! struct out.

/// Receive counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxStats {
    /// Frames delivered.
    pub packets: u64,
    /// Bytes delivered.
    pub bytes: u64,
    /// Descriptors completed, including bad ones.
    pub descriptors: u64,
    /// Descriptors or partial frames dropped because of an error.
    pub errors: u64,
    /// CRC errors reported by the device.
    pub crc_errors: u64,
    /// Framing errors, device-reported or from a broken FIRST/LAST sequence.
    pub frame_errors: u64,
    /// Device FIFO overruns.
    pub overruns: u64,
    /// Refills stopped by an allocation failure.
    pub alloc_failed: u64,
    /// Pages flipped and reposted.
    pub pages_reused: u64,
    /// Pages unmapped because their other half was still held.
    pub pages_released: u64,
    /// Refills stopped by the rate limiter.
    pub throttled: u64,
    /// Completion counts clamped to the outstanding count.
    ///
    /// One per over-report: the excess entries are discarded, so a later
    /// poll only counts again if the device over-reports again.
    pub completion_anomalies: u64,
}

/// Transmit counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxStats {
    /// Frames completed.
    pub packets: u64,
    /// Bytes completed.
    pub bytes: u64,
    /// Completions carrying an error.
    pub errors: u64,
    /// Transmits refused because the ring was full.
    pub busy: u64,
    /// Transmits refused because no buffer could be allocated.
    pub alloc_failed: u64,
    /// Completion counts clamped to the outstanding count.
    pub completion_anomalies: u64,
}
