//! Sliding window log counter.

use std::collections::VecDeque;

use super::clock::Timestamp;

/// Counts requests inside a window that ends at "now".
///
/// Every admitted request is logged; entries leave the log once they are
/// more than `window_ms` old. All accessors prune first so `remaining` and
/// `reset_time` never report stale entries.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    max_requests: u64,
    window_ms: u64,
    log: VecDeque<Timestamp>,
}

impl SlidingWindow {
    pub fn new(max_requests: u64, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            log: VecDeque::new(),
        }
    }

    /// Record a request if the window has room for it.
    pub fn consume(&mut self, now: Timestamp) -> bool {
        self.prune(now);

        if (self.log.len() as u64) < self.max_requests {
            self.log.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn remaining(&mut self, now: Timestamp) -> u64 {
        self.prune(now);
        self.max_requests.saturating_sub(self.log.len() as u64)
    }

    /// The moment the oldest logged request leaves the window.
    pub fn reset_time(&mut self, now: Timestamp) -> Timestamp {
        self.prune(now);

        match self.log.front() {
            Some(oldest) => oldest.saturating_add(self.window_ms),
            None => now.saturating_add(self.window_ms),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.max_requests
    }

    /// Number of requests currently logged.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    fn prune(&mut self, now: Timestamp) {
        while let Some(&oldest) = self.log.front() {
            if oldest.saturating_add(self.window_ms) < now {
                self.log.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_within_window() {
        let mut window = SlidingWindow::new(3, 1_000);

        assert!(window.consume(0));
        assert!(window.consume(100));
        assert!(window.consume(200));
        assert!(!window.consume(300));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_slot_frees_when_oldest_ages_out() {
        let mut window = SlidingWindow::new(3, 1_000);

        window.consume(0);
        window.consume(100);
        window.consume(200);

        assert!(!window.consume(999));
        assert!(window.consume(1_001));
        // Only the first entry has left the window
        assert!(!window.consume(1_050));
        assert!(window.consume(1_101));
    }

    #[test]
    fn test_remaining_prunes_without_consume() {
        let mut window = SlidingWindow::new(2, 1_000);

        window.consume(0);
        window.consume(500);
        assert_eq!(window.remaining(600), 0);
        assert_eq!(window.remaining(1_001), 1);
        assert_eq!(window.remaining(1_501), 2);
        assert!(window.is_empty());
    }

    #[test]
    fn test_reset_time() {
        let mut window = SlidingWindow::new(2, 1_000);

        assert_eq!(window.reset_time(50), 1_050);

        window.consume(100);
        window.consume(400);
        assert_eq!(window.reset_time(500), 1_100);
        assert_eq!(window.reset_time(1_200), 1_400);
    }

    #[test]
    fn test_entry_exactly_window_old_still_counts() {
        let mut window = SlidingWindow::new(1, 1_000);

        assert!(window.consume(0));
        assert_eq!(window.remaining(1_000), 0);
        assert!(!window.consume(1_000));
        assert_eq!(window.reset_time(1_000), 1_000);

        assert!(window.consume(1_001));
    }
}
