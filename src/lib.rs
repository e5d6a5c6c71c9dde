//! Authlimit - Adaptive Rate Limiting for Authentication Endpoints
//!
//! This crate implements an in-process rate limiting engine that protects
//! login and token endpoints from brute-force and abusive traffic. It runs
//! token bucket, sliding window and fixed window limits side by side,
//! resolves them by rule priority, tightens limits under system load and
//! temporarily blocks identifiers that exceed them.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{LimiterError, Result};
pub use ratelimit::{RateLimitResult, RateLimiter, RequestContext};
