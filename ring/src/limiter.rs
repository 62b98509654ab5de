//! Token-bucket packets-per-second limiter.
//!
//! One token admits one receive descriptor post. Tokens are added in whole
//! quanta from a periodic tick and never exceed `token_max`, so a long idle
//! period cannot bank more than one burst.

use crate::config::RateLimit;

/// Token bucket gating receive refills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    tokens: u64,
    token_max: u64,
    quantum: u64,
}

impl TokenBucket {
    /// Bucket holding at most `token_max` tokens, refilled by `quantum` per
    /// tick. Starts full.
    pub fn new(token_max: u64, quantum: u64) -> Self {
        Self {
            tokens: token_max,
            token_max,
            quantum,
        }
    }

    /// Bucket for `limit` ticked every `tick_ms` milliseconds.
    ///
    /// `quantum = pps * tick_ms / 1000` (at least one token) and
    /// `token_max = max(burst, quantum)`.
    pub fn from_rate(limit: RateLimit, tick_ms: u32) -> Self {
        let quantum = (limit.pps as u64 * tick_ms as u64 / 1000).max(1);
        let token_max = (limit.burst as u64).max(quantum);
        Self::new(token_max, quantum)
    }

    /// Add `ticks` quanta, saturating at `token_max`.
    pub fn refill(&mut self, ticks: u32) {
        let add = self.quantum.saturating_mul(ticks as u64);
        self.tokens = self.tokens.saturating_add(add).min(self.token_max);
    }

    /// Take `cost` tokens if available. Never goes negative.
    pub fn try_spend(&mut self, cost: u64) -> bool {
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Give back tokens for work that did not happen.
    pub fn refund(&mut self, cost: u64) {
        self.tokens = self.tokens.saturating_add(cost).min(self.token_max);
    }

    /// Empty the bucket.
    pub fn drain(&mut self) {
        self.tokens = 0;
    }

    /// Tokens currently available.
    #[inline]
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Bucket capacity.
    #[inline]
    pub fn token_max(&self) -> u64 {
        self.token_max
    }

    /// Tokens added per tick.
    #[inline]
    pub fn quantum(&self) -> u64 {
        self.quantum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refill_and_spend() {
        let mut bucket = TokenBucket::new(100, 10);
        bucket.drain();
        bucket.refill(3);
        assert_eq!(bucket.tokens(), 30);
        assert!(bucket.try_spend(25));
        assert_eq!(bucket.tokens(), 5);
        assert!(!bucket.try_spend(6));
        assert_eq!(bucket.tokens(), 5);
    }

    #[test]
    fn test_refill_saturates() {
        let mut bucket = TokenBucket::new(100, 10);
        bucket.drain();
        bucket.refill(50);
        assert_eq!(bucket.tokens(), 100);
        bucket.refill(u32::MAX);
        assert_eq!(bucket.tokens(), 100);
    }

    #[test]
    fn test_from_rate() {
        let bucket = TokenBucket::from_rate(RateLimit::pps(1000), 100);
        assert_eq!(bucket.quantum(), 100);
        assert_eq!(bucket.token_max(), 100);
        assert_eq!(bucket.tokens(), 100);

        let bucket = TokenBucket::from_rate(RateLimit { pps: 5, burst: 32 }, 10);
        assert_eq!(bucket.quantum(), 1);
        assert_eq!(bucket.token_max(), 32);
    }

    #[test]
    fn test_refund_is_capped() {
        let mut bucket = TokenBucket::new(4, 1);
        assert!(bucket.try_spend(1));
        bucket.refund(3);
        assert_eq!(bucket.tokens(), 4);
    }
}
