//! Token bucket counter.

use super::clock::Timestamp;

/// Refill rate used when a rule does not specify one.
pub const DEFAULT_REFILL_RATE: f64 = 1.0;

/// A bucket that holds up to `capacity` tokens and refills continuously.
///
/// Bursts up to the capacity are allowed immediately; afterwards requests
/// are admitted at `refill_rate` tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    /// Tokens per second. Zero or negative means the bucket never refills.
    refill_rate: f64,
    last_refill: Timestamp,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u64, refill_rate: Option<f64>, now: Timestamp) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_rate: refill_rate.unwrap_or(DEFAULT_REFILL_RATE),
            last_refill: now,
        }
    }

    /// Take `n` tokens if available.
    pub fn consume(&mut self, n: u64, now: Timestamp) -> bool {
        self.refill(now);

        let n = n as f64;
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn remaining(&mut self, now: Timestamp) -> u64 {
        self.refill(now);
        self.tokens.floor() as u64
    }

    /// When the bucket will be full again.
    ///
    /// A bucket that never refills reports `Timestamp::MAX` while it has a
    /// deficit.
    pub fn reset_time(&mut self, now: Timestamp) -> Timestamp {
        self.refill(now);

        let deficit = self.capacity - self.tokens;
        if deficit <= 0.0 {
            return now;
        }
        if self.refill_rate <= 0.0 {
            return Timestamp::MAX;
        }

        let wait_ms = (deficit / self.refill_rate * 1000.0).ceil() as u64;
        now.saturating_add(wait_ms)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    fn refill(&mut self, now: Timestamp) {
        let elapsed_ms = now.saturating_sub(self.last_refill);
        self.last_refill = self.last_refill.max(now);

        if self.refill_rate <= 0.0 || elapsed_ms == 0 {
            return;
        }

        let added = elapsed_ms as f64 / 1000.0 * self.refill_rate;
        self.tokens = (self.tokens + added).min(self.capacity);
    }
}
