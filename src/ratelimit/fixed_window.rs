//! Fixed window counter.

use super::clock::Timestamp;

/// Counts requests within epoch-aligned windows.
///
/// Windows start at multiples of `window_ms` since the Unix epoch, not at
/// the first request. A client can therefore land up to twice the limit
/// across a window boundary.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    max_requests: u64,
    window_ms: u64,
    window_start: Timestamp,
    count: u64,
}

impl FixedWindow {
    pub fn new(max_requests: u64, window_ms: u64, now: Timestamp) -> Self {
        let window_ms = window_ms.max(1);
        Self {
            max_requests,
            window_ms,
            window_start: align(now, window_ms),
            count: 0,
        }
    }

    /// Count a request if the current window has room for it.
    pub fn consume(&mut self, now: Timestamp) -> bool {
        let current = align(now, self.window_ms);
        if current > self.window_start {
            self.window_start = current;
            self.count = 0;
        }

        if self.count < self.max_requests {
            self.count += 1;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, now: Timestamp) -> u64 {
        if align(now, self.window_ms) > self.window_start {
            self.max_requests
        } else {
            self.max_requests.saturating_sub(self.count)
        }
    }

    pub fn reset_time(&self, now: Timestamp) -> Timestamp {
        let current = align(now, self.window_ms).max(self.window_start);
        current.saturating_add(self.window_ms)
    }

    pub fn capacity(&self) -> u64 {
        self.max_requests
    }
}

/// Floor `now` to the start of its window.
fn align(now: Timestamp, window_ms: u64) -> Timestamp {
    (now / window_ms) * window_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_alignment() {
        assert_eq!(align(999, 1_000), 0);
        assert_eq!(align(1_000, 1_000), 1_000);
        assert_eq!(align(123_456, 60_000), 120_000);
    }

    #[test]
    fn test_limit_within_window() {
        let mut window = FixedWindow::new(2, 1_000, 100);

        assert!(window.consume(100));
        assert!(window.consume(200));
        assert!(!window.consume(900));
        assert_eq!(window.remaining(950), 0);
    }

    #[test]
    fn test_boundary_requests_fall_in_different_windows() {
        let mut window = FixedWindow::new(2, 1_000, 999);

        assert!(window.consume(999));
        assert!(window.consume(1_001));
    }

    #[test]
    fn test_boundary_burst_allows_twice_the_limit() {
        let mut window = FixedWindow::new(2, 1_000, 998);

        assert!(window.consume(998));
        assert!(window.consume(999));
        assert!(!window.consume(999));

        // Two milliseconds later a fresh window opens
        assert!(window.consume(1_001));
        assert!(window.consume(1_002));
        assert!(!window.consume(1_003));
    }

    #[test]
    fn test_remaining_does_not_reset_count() {
        let mut window = FixedWindow::new(3, 1_000, 0);

        window.consume(10);
        window.consume(20);
        assert_eq!(window.remaining(500), 1);
        // Next window reads as full without touching the stored count
        assert_eq!(window.remaining(1_500), 3);
        assert_eq!(window.remaining(600), 1);
    }

    #[test]
    fn test_reset_time_is_window_end() {
        let mut window = FixedWindow::new(1, 5_000, 7_200);

        assert_eq!(window.reset_time(7_200), 10_000);
        window.consume(7_200);
        assert_eq!(window.reset_time(9_999), 10_000);
        assert_eq!(window.reset_time(10_000), 15_000);
    }
}
