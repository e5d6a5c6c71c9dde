//! Typed lifecycle notifications.
//!
//! The limiter publishes on a bounded broadcast channel and never learns
//! who, if anyone, is listening. Slow subscribers lag and lose the oldest
//! notifications instead of slowing down decisions.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::clock::Timestamp;
use super::limiter::RateLimitResult;

/// Something that happened inside the limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    RuleAdded {
        rule_id: String,
    },
    RuleRemoved {
        rule_id: String,
    },
    RateLimitExceeded {
        identifier: String,
        rule_id: String,
        result: RateLimitResult,
    },
    IdentifierBlocked {
        identifier: String,
        unblock_time: Timestamp,
    },
    IdentifierUnblocked {
        identifier: String,
    },
    CleanupCompleted {
        count: usize,
    },
    CleanupError {
        error: String,
    },
    RateLimitError {
        error: String,
    },
    AlertRaised {
        rule_id: String,
        alert: AlertKind,
        value: f64,
        threshold: f64,
    },
}

impl Notification {
    /// The notification's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::RuleAdded { .. } => "rule:added",
            Notification::RuleRemoved { .. } => "rule:removed",
            Notification::RateLimitExceeded { .. } => "rate_limit:exceeded",
            Notification::IdentifierBlocked { .. } => "identifier:blocked",
            Notification::IdentifierUnblocked { .. } => "identifier:unblocked",
            Notification::CleanupCompleted { .. } => "cleanup:completed",
            Notification::CleanupError { .. } => "cleanup:error",
            Notification::RateLimitError { .. } => "rate_limit:error",
            Notification::AlertRaised { .. } => "alert:raised",
        }
    }
}

/// Which alert threshold was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RequestsPerSecond,
    BlockedRequests,
    SystemLoad,
}

/// Publisher side of the notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a notification. Having no subscribers is not an error.
    pub fn emit(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Notifications as a stream. Lagged gaps surface as `Err` items.
    pub fn stream(&self) -> BroadcastStream<Notification> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
