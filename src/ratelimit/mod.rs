//! Rate limiting algorithms, rules and the decision engine.

mod blocks;
mod clock;
mod counter;
mod events;
mod fixed_window;
mod key;
mod limiter;
mod load;
mod rules;
mod sliding_window;
mod stats;
mod token_bucket;

pub use blocks::{BlockRegistry, BlockedIdentifier};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use counter::{Counter, CounterSlot};
pub use events::{AlertKind, Notification, Notifier};
pub use fixed_window::FixedWindow;
pub use key::{CounterKey, RequestContext};
pub use limiter::{
    RateLimitResult, RateLimiter, RateLimiterBuilder, Reason, ResultMetadata, UNLIMITED,
};
pub use load::{adjusted_limit, FixedLoad, LoadMonitor, LoadSampler, SystemLoadSampler};
pub use rules::{
    default_rules, rule_applies, AlertThresholds, Algorithm, RateLimitConfig, RateLimitRule,
    RuleRegistry, RuleSet, Scope,
};
pub use sliding_window::SlidingWindow;
pub use stats::{RateLimitStats, StatsCollector, TrafficWindow};
pub use token_bucket::TokenBucket;
