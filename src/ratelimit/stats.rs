//! Running statistics for the limiter.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use super::clock::Timestamp;
use super::rules::Scope;

/// Approximate bytes held by one cached counter.
pub const COUNTER_ENTRY_BYTES: usize = 256;
/// Approximate bytes held by one block entry.
pub const BLOCK_ENTRY_BYTES: usize = 64;

/// Snapshot of limiter statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    /// Requests evaluated by rules of each scope
    pub requests_by_scope: HashMap<Scope, u64>,
    /// Requests denied by rules of each scope
    pub denials_by_scope: HashMap<Scope, u64>,
    pub active_rules: usize,
    pub active_blocks: usize,
    pub tracked_counters: usize,
    /// Mean decision latency in milliseconds over fully evaluated requests
    pub average_response_time_ms: f64,
    pub memory_usage_bytes: usize,
    pub system_load: f64,
    pub last_cleanup: Option<Timestamp>,
}

/// Mutable counters behind [`RateLimitStats`].
#[derive(Debug, Default)]
pub struct StatsCollector {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stats: RateLimitStats,
    latency_samples: u64,
    /// (timestamp, total_requests, blocked_requests) at the previous measurement
    window_mark: Option<(Timestamp, u64, u64)>,
}

/// Traffic observed between two measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficWindow {
    pub requests_per_second: f64,
    pub blocked_requests: u64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a finished decision.
    pub fn record_decision(&self, allowed: bool) {
        let mut inner = self.inner.lock();
        inner.stats.total_requests += 1;
        if allowed {
            inner.stats.allowed_requests += 1;
        } else {
            inner.stats.blocked_requests += 1;
        }
    }

    /// Count a rule evaluation for its scope.
    pub fn record_scope(&self, scope: Scope, denied: bool) {
        let mut inner = self.inner.lock();
        *inner.stats.requests_by_scope.entry(scope).or_insert(0) += 1;
        if denied {
            *inner.stats.denials_by_scope.entry(scope).or_insert(0) += 1;
        }
    }

    /// Fold a latency sample into the running mean.
    pub fn record_latency(&self, sample_ms: f64) {
        let mut inner = self.inner.lock();
        inner.latency_samples += 1;
        let n = inner.latency_samples as f64;
        let avg = inner.stats.average_response_time_ms;
        inner.stats.average_response_time_ms = (avg * (n - 1.0) + sample_ms) / n;
    }

    /// Refresh the gauges derived from engine state.
    pub fn update_gauges(
        &self,
        active_rules: usize,
        active_blocks: usize,
        tracked_counters: usize,
        memory_usage_bytes: usize,
    ) {
        let mut inner = self.inner.lock();
        inner.stats.active_rules = active_rules;
        inner.stats.active_blocks = active_blocks;
        inner.stats.tracked_counters = tracked_counters;
        inner.stats.memory_usage_bytes = memory_usage_bytes;
    }

    pub fn set_system_load(&self, load: f64) {
        self.inner.lock().stats.system_load = load;
    }

    pub fn mark_cleanup(&self, now: Timestamp) {
        self.inner.lock().stats.last_cleanup = Some(now);
    }

    /// Traffic since the previous call, if one happened.
    pub fn take_window(&self, now: Timestamp) -> Option<TrafficWindow> {
        let mut inner = self.inner.lock();
        let total = inner.stats.total_requests;
        let blocked = inner.stats.blocked_requests;
        let previous = inner.window_mark.replace((now, total, blocked));

        let (then, then_total, then_blocked) = previous?;
        let elapsed_ms = now.saturating_sub(then);
        if elapsed_ms == 0 {
            return None;
        }
        Some(TrafficWindow {
            requests_per_second: total.saturating_sub(then_total) as f64 * 1000.0
                / elapsed_ms as f64,
            blocked_requests: blocked.saturating_sub(then_blocked),
        })
    }

    pub fn snapshot(&self) -> RateLimitStats {
        self.inner.lock().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_counters() {
        let collector = StatsCollector::new();
        collector.record_decision(true);
        collector.record_decision(true);
        collector.record_decision(false);

        let stats = collector.snapshot();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.allowed_requests, 2);
        assert_eq!(stats.blocked_requests, 1);
    }

    #[test]
    fn test_incremental_mean() {
        let collector = StatsCollector::new();
        collector.record_latency(2.0);
        collector.record_latency(4.0);
        collector.record_latency(9.0);

        assert!((collector.snapshot().average_response_time_ms - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_scope_counts() {
        let collector = StatsCollector::new();
        collector.record_scope(Scope::PerIp, false);
        collector.record_scope(Scope::PerIp, true);
        collector.record_scope(Scope::Global, false);

        let stats = collector.snapshot();
        assert_eq!(stats.requests_by_scope[&Scope::PerIp], 2);
        assert_eq!(stats.denials_by_scope[&Scope::PerIp], 1);
        assert_eq!(stats.requests_by_scope[&Scope::Global], 1);
        assert!(!stats.denials_by_scope.contains_key(&Scope::Global));
    }

    #[test]
    fn test_traffic_window() {
        let collector = StatsCollector::new();
        assert_eq!(collector.take_window(0), None);

        for _ in 0..20 {
            collector.record_decision(true);
        }
        collector.record_decision(false);
        collector.record_decision(false);

        let window = collector.take_window(2_000).unwrap();
        assert_eq!(window.requests_per_second, 11.0);
        assert_eq!(window.blocked_requests, 2);

        assert_eq!(collector.take_window(2_000), None);
        collector.record_decision(false);
        let window = collector.take_window(3_000).unwrap();
        assert_eq!(window.blocked_requests, 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let collector = StatsCollector::new();
        let before = collector.snapshot();
        collector.record_decision(true);

        assert_eq!(before.total_requests, 0);
        assert_eq!(collector.snapshot().total_requests, 1);
    }
}
