//! Per-key counter state shared by all algorithms.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::clock::Timestamp;
use super::fixed_window::FixedWindow;
use super::rules::{Algorithm, RateLimitConfig};
use super::sliding_window::SlidingWindow;
use super::token_bucket::TokenBucket;
use crate::error::{LimiterError, Result};

/// The algorithm state behind one counter key.
#[derive(Debug, Clone)]
pub enum Counter {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
    FixedWindow(FixedWindow),
}

impl Counter {
    /// Build the counter a rule config calls for.
    pub fn for_config(config: &RateLimitConfig, now: Timestamp) -> Result<Self> {
        match config.algorithm {
            Algorithm::TokenBucket => Ok(Counter::TokenBucket(TokenBucket::new(
                config.burst(),
                config.refill_rate,
                now,
            ))),
            Algorithm::SlidingWindow => Ok(Counter::SlidingWindow(SlidingWindow::new(
                config.max_requests,
                config.window_ms,
            ))),
            Algorithm::FixedWindow => Ok(Counter::FixedWindow(FixedWindow::new(
                config.max_requests,
                config.window_ms,
                now,
            ))),
            Algorithm::Adaptive => Err(LimiterError::Configuration(
                "adaptive is a throttling mode, not a counter algorithm".to_string(),
            )),
        }
    }

    pub fn consume(&mut self, now: Timestamp) -> bool {
        match self {
            Counter::TokenBucket(bucket) => bucket.consume(1, now),
            Counter::SlidingWindow(window) => window.consume(now),
            Counter::FixedWindow(window) => window.consume(now),
        }
    }

    pub fn remaining(&mut self, now: Timestamp) -> u64 {
        match self {
            Counter::TokenBucket(bucket) => bucket.remaining(now),
            Counter::SlidingWindow(window) => window.remaining(now),
            Counter::FixedWindow(window) => window.remaining(now),
        }
    }

    pub fn reset_time(&mut self, now: Timestamp) -> Timestamp {
        match self {
            Counter::TokenBucket(bucket) => bucket.reset_time(now),
            Counter::SlidingWindow(window) => window.reset_time(now),
            Counter::FixedWindow(window) => window.reset_time(now),
        }
    }

    /// Requests the counter holds when untouched.
    pub fn capacity(&self) -> u64 {
        match self {
            Counter::TokenBucket(bucket) => bucket.capacity(),
            Counter::SlidingWindow(window) => window.capacity(),
            Counter::FixedWindow(window) => window.capacity(),
        }
    }
}

/// A counter plus its last access time.
///
/// The mutex is only ever held for the synchronous body of a decision, so
/// concurrent checks for the same key serialise without tearing.
#[derive(Debug)]
pub struct CounterSlot {
    counter: Mutex<Counter>,
    last_used: AtomicU64,
}

impl CounterSlot {
    pub fn new(counter: Counter, now: Timestamp) -> Self {
        Self {
            counter: Mutex::new(counter),
            last_used: AtomicU64::new(now),
        }
    }

    /// Run `f` with exclusive access to the counter and mark the slot used.
    pub fn with<R>(&self, now: Timestamp, f: impl FnOnce(&mut Counter) -> R) -> R {
        self.last_used.fetch_max(now, Ordering::Relaxed);
        let mut counter = self.counter.lock();
        f(&mut counter)
    }

    /// Inspect the counter without refreshing its last access time.
    pub fn peek<R>(&self, f: impl FnOnce(&mut Counter) -> R) -> R {
        let mut counter = self.counter.lock();
        f(&mut counter)
    }

    pub fn last_used(&self) -> Timestamp {
        self.last_used.load(Ordering::Relaxed)
    }

    /// Whether the slot has gone unused for at least `ttl_ms`.
    pub fn is_idle(&self, now: Timestamp, ttl_ms: u64) -> bool {
        now.saturating_sub(self.last_used()) >= ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::Scope;

    fn config(algorithm: Algorithm) -> RateLimitConfig {
        RateLimitConfig::new(algorithm, Scope::Global, 3, 1_000, 1_000)
    }

    #[test]
    fn test_counter_for_each_algorithm() {
        for algorithm in [
            Algorithm::TokenBucket,
            Algorithm::SlidingWindow,
            Algorithm::FixedWindow,
        ] {
            let mut counter = Counter::for_config(&config(algorithm), 0).unwrap();
            assert_eq!(counter.capacity(), 3, "{}", algorithm);
            assert!(counter.consume(0));
            assert_eq!(counter.remaining(0), 2, "{}", algorithm);
        }
    }

    #[test]
    fn test_adaptive_algorithm_is_rejected() {
        let result = Counter::for_config(&config(Algorithm::Adaptive), 0);
        assert!(matches!(result, Err(LimiterError::Configuration(_))));
    }

    #[test]
    fn test_token_bucket_capacity_uses_burst() {
        let config = config(Algorithm::TokenBucket).with_burst(5, 1.0);
        let counter = Counter::for_config(&config, 0).unwrap();
        assert_eq!(counter.capacity(), 5);
    }

    #[test]
    fn test_slot_tracks_last_use() {
        let slot = CounterSlot::new(Counter::for_config(&config(Algorithm::FixedWindow), 0).unwrap(), 100);

        assert!(slot.with(500, |c| c.consume(500)));
        assert_eq!(slot.last_used(), 500);

        // Peeking does not count as use
        assert_eq!(slot.peek(|c| c.remaining(900)), 2);
        assert_eq!(slot.last_used(), 500);

        assert!(!slot.is_idle(1_000, 1_000));
        assert!(slot.is_idle(1_500, 1_000));
    }
}
