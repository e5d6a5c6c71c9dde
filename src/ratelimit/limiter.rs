//! The rate limiting engine.
//!
//! Every check runs the same pipeline and stops at the first terminal
//! outcome: deny-list, allow-list, active block, no applicable rules, then
//! each applicable rule in priority order. The first rule that denies
//! blocks the identifier for that rule's block duration.
//!
//! Failures while evaluating rules never reach the caller. They are turned
//! into an allowed result with reason [`Reason::Error`] and published as a
//! [`Notification::RateLimitError`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, instrument, trace, warn};

use super::blocks::{BlockRegistry, BlockedIdentifier};
use super::clock::{Clock, SystemClock, Timestamp};
use super::counter::{Counter, CounterSlot};
use super::events::{AlertKind, Notification, Notifier};
use super::key::{CounterKey, RequestContext};
use super::load::{adjusted_limit, LoadMonitor, LoadSampler, SystemLoadSampler};
use super::rules::{default_rules, Algorithm, RateLimitRule, RuleRegistry, Scope};
use super::stats::{RateLimitStats, StatsCollector, BLOCK_ENTRY_BYTES, COUNTER_ENTRY_BYTES};
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};

/// `remaining` reported when no limit constrains the request.
pub const UNLIMITED: u64 = u64::MAX;

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Blacklist,
    Whitelist,
    Blocked,
    NoRules,
    RateLimited,
    SystemOverload,
    Allowed,
    Error,
}

/// Context attached to every decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub reason: Reason,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Algorithm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    /// Load sample used by an adaptive rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_load: Option<f64>,
}

/// The outcome of a single rate limit check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_time: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unblock_time: Option<Timestamp>,
    /// The rule that decided, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub metadata: ResultMetadata,
}

impl RateLimitResult {
    /// A decision made before any rule was consulted.
    fn unruled(identifier: &str, allowed: bool, reason: Reason, now: Timestamp) -> Self {
        Self {
            allowed,
            remaining: if allowed { UNLIMITED } else { 0 },
            reset_time: now,
            unblock_time: None,
            rule_id: None,
            metadata: ResultMetadata {
                reason,
                identifier: identifier.to_string(),
                algorithm: None,
                scope: None,
                system_load: None,
            },
        }
    }

    fn for_rule(
        rule: &RateLimitRule,
        identifier: &str,
        allowed: bool,
        reason: Reason,
        remaining: u64,
        reset_time: Timestamp,
        system_load: Option<f64>,
    ) -> Self {
        Self {
            allowed,
            remaining,
            reset_time,
            unblock_time: None,
            rule_id: Some(rule.id.clone()),
            metadata: ResultMetadata {
                reason,
                identifier: identifier.to_string(),
                algorithm: Some(rule.config.algorithm),
                scope: Some(rule.config.scope),
                system_load,
            },
        }
    }

    pub fn reason(&self) -> Reason {
        self.metadata.reason
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    config: LimiterConfig,
    rules: Vec<RateLimitRule>,
    clock: Option<Arc<dyn Clock>>,
    sampler: Option<Arc<dyn LoadSampler>>,
}

impl RateLimiterBuilder {
    pub fn config(mut self, config: LimiterConfig) -> Self {
        self.config = config;
        self
    }

    /// Extra rules registered after the defaults.
    pub fn rules(mut self, rules: impl IntoIterator<Item = RateLimitRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn rule(mut self, rule: RateLimitRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn load_sampler(mut self, sampler: Arc<dyn LoadSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Build the engine. Fails if any supplied rule is invalid.
    pub fn build(self) -> Result<RateLimiter> {
        let limiter = RateLimiter::from_parts(
            self.config,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.sampler.unwrap_or_else(|| Arc::new(SystemLoadSampler)),
        );

        if limiter.config.install_default_rules {
            for rule in default_rules() {
                limiter.install(rule);
            }
        }
        for rule in self.rules {
            limiter.add_rule(rule)?;
        }

        info!(
            rules = limiter.rules.len(),
            "Rate limiter initialized"
        );
        Ok(limiter)
    }
}

/// The rate limiting engine.
///
/// Shared state lives in concurrent maps; each counter has its own mutex
/// held only for the synchronous part of a decision, so checks for
/// different keys never contend and no lock is held across an `.await`.
pub struct RateLimiter {
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    rules: RuleRegistry,
    counters: DashMap<CounterKey, Arc<CounterSlot>>,
    blocks: BlockRegistry,
    load: LoadMonitor,
    stats: StatsCollector,
    notifier: Notifier,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .field("counters", &self.counters.len())
            .field("blocks", &self.blocks.len())
            .field("load", &self.load)
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter with the default configuration and rule set.
    pub fn new() -> Self {
        let limiter = Self::from_parts(
            LimiterConfig::default(),
            Arc::new(SystemClock),
            Arc::new(SystemLoadSampler),
        );
        for rule in default_rules() {
            limiter.install(rule);
        }
        limiter
    }

    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder {
            config: LimiterConfig::default(),
            rules: Vec::new(),
            clock: None,
            sampler: None,
        }
    }

    fn from_parts(
        config: LimiterConfig,
        clock: Arc<dyn Clock>,
        sampler: Arc<dyn LoadSampler>,
    ) -> Self {
        Self {
            notifier: Notifier::new(config.notification_capacity),
            config,
            clock,
            rules: RuleRegistry::new(),
            counters: DashMap::new(),
            blocks: BlockRegistry::new(),
            load: LoadMonitor::new(sampler),
            stats: StatsCollector::new(),
            tasks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Spawn the load sampling and cleanup tasks.
    ///
    /// The tasks hold only a weak reference and stop on their own once the
    /// limiter is dropped; [`RateLimiter::destroy`] cancels them right away.
    /// Calling this more than once has no effect.
    pub fn start_background_tasks(self: &Arc<Self>) {
        if self.is_destroyed() {
            return;
        }
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.load_sample_interval();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                limiter.refresh_load().await;
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval();
        tasks.push(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                // Failures are already published as CleanupError
                let _ = limiter.cleanup();
            }
        }));

        info!(
            cleanup_interval_secs = self.config.cleanup_interval().as_secs(),
            load_sample_interval_secs = self.config.load_sample_interval().as_secs(),
            "Background tasks started"
        );
    }

    /// Number of running background tasks.
    pub fn background_task_count(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Check whether a request from `identifier` may proceed.
    ///
    /// Scoped rules only apply when `context` carries the identifier in the
    /// matching field, so callers pass the identifier for the scope they
    /// are checking. This never fails; see the module docs for how errors
    /// are handled.
    #[instrument(skip_all, fields(identifier = %identifier))]
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        context: Option<&RequestContext>,
    ) -> RateLimitResult {
        let started = Instant::now();
        let now = self.clock.now_ms();

        if self.is_destroyed() {
            let result = self.fail_open(identifier, now, LimiterError::Destroyed.to_string());
            self.stats.record_decision(true);
            return result;
        }

        if self.is_blacklisted(identifier) {
            trace!("Identifier is blacklisted");
            self.stats.record_decision(false);
            return RateLimitResult::unruled(identifier, false, Reason::Blacklist, now);
        }

        if self.is_whitelisted(identifier) {
            trace!("Identifier is whitelisted");
            self.stats.record_decision(true);
            return RateLimitResult::unruled(identifier, true, Reason::Whitelist, now);
        }

        if let Some(unblock_time) = self.blocks.blocked_until(identifier, now) {
            trace!(unblock_time = unblock_time, "Identifier is blocked");
            self.stats.record_decision(false);
            let mut result = RateLimitResult::unruled(identifier, false, Reason::Blocked, now);
            result.reset_time = unblock_time;
            result.unblock_time = Some(unblock_time);
            return result;
        }

        let empty = RequestContext::default();
        let context = context.unwrap_or(&empty);

        let result = self.run_guarded(identifier, now, || self.evaluate(identifier, context, now));

        self.stats.record_decision(result.allowed);
        if matches!(result.reason(), Reason::NoRules | Reason::Allowed) {
            self.stats
                .record_latency(started.elapsed().as_secs_f64() * 1000.0);
        }

        trace!(
            allowed = result.allowed,
            reason = ?result.reason(),
            remaining = result.remaining,
            "Rate limit decision made"
        );
        result
    }

    /// Run `evaluate`, turning errors and panics into a fail-open result.
    fn run_guarded(
        &self,
        identifier: &str,
        now: Timestamp,
        evaluate: impl FnOnce() -> Result<RateLimitResult>,
    ) -> RateLimitResult {
        match panic::catch_unwind(AssertUnwindSafe(evaluate)) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => self.fail_open(identifier, now, e.to_string()),
            Err(payload) => self.fail_open(identifier, now, panic_message(payload.as_ref())),
        }
    }

    /// Run the applicable rules in priority order.
    fn evaluate(
        &self,
        identifier: &str,
        context: &RequestContext,
        now: Timestamp,
    ) -> Result<RateLimitResult> {
        let rules = self.rules.find_applicable(identifier, context);
        if rules.is_empty() {
            return Ok(RateLimitResult::unruled(identifier, true, Reason::NoRules, now));
        }

        let load = self.load.latest();
        let mut tightest: Option<RateLimitResult> = None;

        for rule in &rules {
            let decision = self.evaluate_rule(rule, identifier, context, now, load)?;
            self.stats.record_scope(rule.config.scope, !decision.allowed);

            if !decision.allowed {
                return Ok(self.deny(rule, identifier, decision, now));
            }
            if tightest
                .as_ref()
                .map_or(true, |t| decision.remaining < t.remaining)
            {
                tightest = Some(decision);
            }
        }

        tightest.ok_or_else(|| LimiterError::Pipeline("no rule produced a decision".to_string()))
    }

    fn evaluate_rule(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        context: &RequestContext,
        now: Timestamp,
        load: f64,
    ) -> Result<RateLimitResult> {
        let config = &rule.config;
        let system_load = config.adaptive.then_some(load);
        let overloaded = system_load
            .and_then(|load| adjusted_limit(config.max_requests, load, config.load_threshold))
            == Some(0);

        if overloaded {
            debug!(rule_id = %rule.id, load = load, "Adaptive limit exhausted");
            return Ok(RateLimitResult::for_rule(
                rule,
                identifier,
                false,
                Reason::SystemOverload,
                0,
                now.saturating_add(config.window_ms),
                system_load,
            ));
        }

        let key = CounterKey::new(rule, identifier, context);
        let slot = self.counter_slot(&key, rule, now)?;

        Ok(slot.with(now, |counter| {
            let allowed = counter.consume(now);
            let reason = if allowed {
                Reason::Allowed
            } else {
                Reason::RateLimited
            };
            RateLimitResult::for_rule(
                rule,
                identifier,
                allowed,
                reason,
                counter.remaining(now),
                counter.reset_time(now),
                system_load,
            )
        }))
    }

    /// Fetch the counter for a key, creating it on first use.
    ///
    /// A counter created while its rule is being removed or replaced is
    /// dropped from the map again, so eviction never leaves one behind.
    fn counter_slot(
        &self,
        key: &CounterKey,
        rule: &RateLimitRule,
        now: Timestamp,
    ) -> Result<Arc<CounterSlot>> {
        if let Some(slot) = self.counters.get(key) {
            return Ok(Arc::clone(slot.value()));
        }

        let counter = Counter::for_config(&rule.config, now)?;
        let slot = Arc::clone(
            self.counters
                .entry(key.clone())
                .or_insert_with(|| {
                    debug!(
                        key = %key,
                        algorithm = %rule.config.algorithm,
                        "Creating new rate limit counter"
                    );
                    Arc::new(CounterSlot::new(counter, now))
                })
                .value(),
        );

        let current = self.rules.get(&rule.id);
        if !current.is_some_and(|current| current.config == rule.config) {
            debug!(rule_id = %rule.id, "Rule changed during evaluation, discarding counter");
            self.counters.remove_if(key, |_, cached| Arc::ptr_eq(cached, &slot));
        }
        Ok(slot)
    }

    /// Turn a rule's denial into a block.
    fn deny(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        mut result: RateLimitResult,
        now: Timestamp,
    ) -> RateLimitResult {
        let unblock_time = now.saturating_add(rule.config.block_duration_ms);
        self.block_until(identifier, unblock_time);
        result.unblock_time = Some(unblock_time);

        warn!(
            identifier = %identifier,
            rule_id = %rule.id,
            reason = ?result.reason(),
            unblock_time = unblock_time,
            "Rate limit exceeded"
        );
        self.notifier.emit(Notification::RateLimitExceeded {
            identifier: identifier.to_string(),
            rule_id: rule.id.clone(),
            result: result.clone(),
        });
        result
    }

    fn fail_open(&self, identifier: &str, now: Timestamp, error: String) -> RateLimitResult {
        warn!(identifier = %identifier, error = %error, "Rate limit check failed, allowing request");
        self.notifier.emit(Notification::RateLimitError { error });
        RateLimitResult::unruled(identifier, true, Reason::Error, now)
    }

    fn is_blacklisted(&self, identifier: &str) -> bool {
        self.config.blacklist.contains(identifier) || self.rules.blacklists(identifier)
    }

    fn is_whitelisted(&self, identifier: &str) -> bool {
        self.config.whitelist.contains(identifier) || self.rules.whitelists(identifier)
    }

    /// Register a rule, replacing any rule with the same id.
    ///
    /// Replacing a rule discards the counters built for the old version.
    pub fn add_rule(&self, rule: RateLimitRule) -> Result<()> {
        self.ensure_live()?;
        rule.validate()?;
        self.install(rule);
        Ok(())
    }

    fn install(&self, rule: RateLimitRule) {
        let rule_id = rule.id.clone();
        let replaced = self.rules.insert(rule, self.now_utc());
        if replaced.is_some() {
            let evicted = self.evict_counters(&rule_id);
            debug!(rule_id = %rule_id, evicted = evicted, "Replaced rate limit rule");
        }

        info!(rule_id = %rule_id, "Rate limit rule added");
        self.notifier.emit(Notification::RuleAdded { rule_id });
    }

    /// Remove a rule and its counters. Returns `false` for unknown ids.
    pub fn remove_rule(&self, rule_id: &str) -> Result<bool> {
        self.ensure_live()?;
        if self.rules.remove(rule_id).is_none() {
            return Ok(false);
        }

        let evicted = self.evict_counters(rule_id);
        info!(rule_id = %rule_id, evicted = evicted, "Rate limit rule removed");
        self.notifier.emit(Notification::RuleRemoved {
            rule_id: rule_id.to_string(),
        });
        Ok(true)
    }

    /// Enable or disable a rule without discarding its counters.
    pub fn set_rule_active(&self, rule_id: &str, active: bool) -> Result<bool> {
        self.ensure_live()?;
        let found = self.rules.set_active(rule_id, active, self.now_utc());
        if found {
            info!(rule_id = %rule_id, active = active, "Rate limit rule toggled");
        }
        Ok(found)
    }

    pub fn rules(&self) -> Vec<Arc<RateLimitRule>> {
        self.rules.all()
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<Arc<RateLimitRule>> {
        self.rules.get(rule_id)
    }

    fn evict_counters(&self, rule_id: &str) -> usize {
        let before = self.counters.len();
        self.counters.retain(|key, _| key.rule_id != rule_id);
        before.saturating_sub(self.counters.len())
    }

    /// Block an identifier for `duration_ms`. Returns the unblock time.
    pub fn block_identifier(&self, identifier: &str, duration_ms: u64) -> Result<Timestamp> {
        self.ensure_live()?;
        let unblock_time = self.clock.now_ms().saturating_add(duration_ms);
        self.block_until(identifier, unblock_time);
        Ok(unblock_time)
    }

    fn block_until(&self, identifier: &str, unblock_time: Timestamp) {
        self.blocks.block(identifier, unblock_time);
        info!(identifier = %identifier, unblock_time = unblock_time, "Identifier blocked");
        self.notifier.emit(Notification::IdentifierBlocked {
            identifier: identifier.to_string(),
            unblock_time,
        });
    }

    /// Lift a block. Returns `false` if the identifier was not blocked.
    pub fn unblock_identifier(&self, identifier: &str) -> Result<bool> {
        self.ensure_live()?;
        if !self.blocks.unblock(identifier) {
            return Ok(false);
        }

        info!(identifier = %identifier, "Identifier unblocked");
        self.notifier.emit(Notification::IdentifierUnblocked {
            identifier: identifier.to_string(),
        });
        Ok(true)
    }

    /// Currently blocked identifiers, soonest release first.
    pub fn get_blocked_identifiers(&self) -> Vec<BlockedIdentifier> {
        self.blocks.list(self.clock.now_ms())
    }

    /// Remaining capacity of a counter without consuming from it.
    ///
    /// Returns `None` if the rule is unknown or the counter was never used.
    pub fn peek_remaining(
        &self,
        rule_id: &str,
        identifier: &str,
        context: Option<&RequestContext>,
    ) -> Option<u64> {
        let rule = self.rules.get(rule_id)?;
        let empty = RequestContext::default();
        let key = CounterKey::new(&rule, identifier, context.unwrap_or(&empty));
        let slot = Arc::clone(self.counters.get(&key)?.value());

        let now = self.clock.now_ms();
        Some(slot.peek(|counter| counter.remaining(now)))
    }

    /// Number of cached counters.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Take a fresh load sample for adaptive rules.
    pub async fn refresh_load(&self) -> f64 {
        let load = self.load.refresh().await;
        self.stats.set_system_load(load);
        load
    }

    /// The load sample adaptive rules currently see.
    pub fn system_load(&self) -> f64 {
        self.load.latest()
    }

    /// Snapshot of the current statistics.
    pub fn get_stats(&self) -> RateLimitStats {
        self.refresh_gauges();
        self.stats.snapshot()
    }

    fn refresh_gauges(&self) {
        let counters = self.counters.len();
        let blocks = self.blocks.len();
        self.stats.update_gauges(
            self.rules.active_count(),
            blocks,
            counters,
            self.memory_estimate(counters, blocks),
        );
    }

    fn memory_estimate(&self, counters: usize, blocks: usize) -> usize {
        let rules: usize = self
            .rules
            .all()
            .iter()
            .map(|rule| serde_json::to_vec(rule.as_ref()).map(|v| v.len()).unwrap_or(0))
            .sum();
        rules + counters * COUNTER_ENTRY_BYTES + blocks * BLOCK_ENTRY_BYTES
    }

    /// Evict expired blocks and idle counters, refresh derived statistics
    /// and evaluate alert thresholds. Returns the number of evicted entries.
    pub fn cleanup(&self) -> Result<usize> {
        if let Err(e) = self.ensure_live() {
            self.notifier.emit(Notification::CleanupError {
                error: e.to_string(),
            });
            return Err(e);
        }

        let now = self.clock.now_ms();
        let expired_blocks = self.blocks.purge_expired(now);

        let idle_counters = match self.config.instance_idle_ttl_ms() {
            Some(ttl) => {
                let before = self.counters.len();
                self.counters.retain(|_, slot| !slot.is_idle(now, ttl));
                before.saturating_sub(self.counters.len())
            }
            None => 0,
        };

        self.refresh_gauges();
        self.stats.mark_cleanup(now);
        self.check_alerts(now);

        let count = expired_blocks + idle_counters;
        debug!(
            expired_blocks = expired_blocks,
            idle_counters = idle_counters,
            "Rate limiter cleanup completed"
        );
        self.notifier.emit(Notification::CleanupCompleted { count });
        Ok(count)
    }

    fn check_alerts(&self, now: Timestamp) {
        let window = self.stats.take_window(now);
        let load = self.load.latest();

        for rule in self.rules.active() {
            let thresholds = &rule.config.alert_thresholds;

            if let Some(window) = window {
                if window.requests_per_second > thresholds.requests_per_second {
                    self.raise_alert(
                        &rule,
                        AlertKind::RequestsPerSecond,
                        window.requests_per_second,
                        thresholds.requests_per_second,
                    );
                }
                if window.blocked_requests > thresholds.blocked_requests {
                    self.raise_alert(
                        &rule,
                        AlertKind::BlockedRequests,
                        window.blocked_requests as f64,
                        thresholds.blocked_requests as f64,
                    );
                }
            }
            if load > thresholds.system_load {
                self.raise_alert(&rule, AlertKind::SystemLoad, load, thresholds.system_load);
            }
        }
    }

    fn raise_alert(&self, rule: &RateLimitRule, alert: AlertKind, value: f64, threshold: f64) {
        warn!(
            rule_id = %rule.id,
            alert = ?alert,
            value = value,
            threshold = threshold,
            "Rate limit alert threshold exceeded"
        );
        self.notifier.emit(Notification::AlertRaised {
            rule_id: rule.id.clone(),
            alert,
            value,
            threshold,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn notifications(&self) -> BroadcastStream<Notification> {
        self.notifier.stream()
    }

    /// Stop background tasks and release all state.
    ///
    /// The limiter is unusable afterwards: mutating calls return
    /// [`LimiterError::Destroyed`] and checks fail open.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(LimiterError::Destroyed);
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.rules.clear();
        self.counters.clear();
        self.blocks.clear();

        info!("Rate limiter destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(LimiterError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.now_ms() as i64).unwrap_or_default()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic during rule evaluation: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic during rule evaluation: {}", message)
    } else {
        "panic during rule evaluation".to_string()
    }
}
