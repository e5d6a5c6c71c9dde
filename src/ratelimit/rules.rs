//! Rate limit rules, the default rule set and the rule registry.
//!
//! Rules can be built in code or loaded from YAML documents of the form:
//!
//! ```yaml
//! rules:
//!   - id: login_ip
//!     name: Login attempts per IP
//!     priority: 10
//!     config:
//!       algorithm: token_bucket
//!       scope: per_ip
//!       max_requests: 10
//!       window_ms: 60000
//!       burst_size: 5
//!       refill_rate: 0.1
//!       block_duration_ms: 900000
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::key::RequestContext;
use crate::error::{LimiterError, Result};

/// Throttling algorithm a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
    /// Accepted in configuration but has no counter of its own.
    Adaptive,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::Adaptive => "adaptive",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The dimension over which a rule's limit is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    PerUser,
    PerIp,
    PerSession,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::PerUser => "per_user",
            Scope::PerIp => "per_ip",
            Scope::PerSession => "per_session",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Levels above which the engine raises operational alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_alert_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_alert_blocked")]
    pub blocked_requests: u64,
    #[serde(default = "default_alert_load")]
    pub system_load: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            requests_per_second: default_alert_rps(),
            blocked_requests: default_alert_blocked(),
            system_load: default_alert_load(),
        }
    }
}

fn default_alert_rps() -> f64 {
    100.0
}

fn default_alert_blocked() -> u64 {
    50
}

fn default_alert_load() -> f64 {
    0.9
}

fn default_load_threshold() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

/// Limit settings for a single rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub algorithm: Algorithm,
    pub scope: Scope,
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Token bucket capacity; defaults to `max_requests`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u64>,
    /// Token bucket refill in tokens per second; defaults to 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<f64>,
    /// How long an identifier stays blocked after this rule denies it
    pub block_duration_ms: u64,
    #[serde(default)]
    pub adaptive: bool,
    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,
    #[serde(default)]
    pub whitelist: HashSet<String>,
    #[serde(default)]
    pub blacklist: HashSet<String>,
    #[serde(default)]
    pub alert_thresholds: AlertThresholds,
}

impl RateLimitConfig {
    /// A config with the required fields set and everything else defaulted.
    pub fn new(
        algorithm: Algorithm,
        scope: Scope,
        max_requests: u64,
        window_ms: u64,
        block_duration_ms: u64,
    ) -> Self {
        Self {
            algorithm,
            scope,
            max_requests,
            window_ms,
            burst_size: None,
            refill_rate: None,
            block_duration_ms,
            adaptive: false,
            load_threshold: default_load_threshold(),
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
            alert_thresholds: AlertThresholds::default(),
        }
    }

    pub fn with_burst(mut self, burst_size: u64, refill_rate: f64) -> Self {
        self.burst_size = Some(burst_size);
        self.refill_rate = Some(refill_rate);
        self
    }

    pub fn with_adaptive(mut self, load_threshold: f64) -> Self {
        self.adaptive = true;
        self.load_threshold = load_threshold;
        self
    }

    /// Token bucket capacity.
    pub fn burst(&self) -> u64 {
        self.burst_size.unwrap_or(self.max_requests)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_requests == 0 {
            return Err("max_requests must be greater than zero".to_string());
        }
        if self.window_ms == 0 {
            return Err("window_ms must be greater than zero".to_string());
        }
        if self.burst_size == Some(0) {
            return Err("burst_size must be greater than zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.load_threshold) {
            return Err(format!(
                "load_threshold must be within [0, 1], got {}",
                self.load_threshold
            ));
        }
        Ok(())
    }
}

/// A named, prioritised rate limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub config: RateLimitConfig,
    /// Higher priorities are evaluated first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl RateLimitRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            config,
            priority: 0,
            active: true,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LimiterError::InvalidRule("rule id must not be empty".to_string()));
        }
        self.config
            .validate()
            .map_err(|e| LimiterError::InvalidRule(format!("{}: {}", self.id, e)))
    }
}

/// Whether a rule governs the given identifier.
///
/// Global rules always apply. Scoped rules apply only when the request
/// context carries the identifier in the field matching the rule's scope.
pub fn rule_applies(rule: &RateLimitRule, identifier: &str, context: &RequestContext) -> bool {
    match rule.config.scope {
        Scope::Global => true,
        scope => context.scoped_value(scope) == Some(identifier),
    }
}

/// The rule set installed when an engine starts.
pub fn default_rules() -> Vec<RateLimitRule> {
    vec![
        RateLimitRule::new(
            "global_auth_limit",
            "Global authentication limit",
            RateLimitConfig::new(Algorithm::SlidingWindow, Scope::Global, 1000, 60_000, 5 * 60_000)
                .with_adaptive(default_load_threshold()),
        )
        .with_description("Caps total authentication traffic across all clients")
        .with_priority(1),
        RateLimitRule::new(
            "ip_auth_limit",
            "Per-IP authentication limit",
            RateLimitConfig::new(Algorithm::TokenBucket, Scope::PerIp, 10, 60_000, 15 * 60_000)
                .with_burst(5, 0.1)
                .with_adaptive(default_load_threshold()),
        )
        .with_description("Throttles brute-force attempts from a single address")
        .with_priority(2),
        RateLimitRule::new(
            "user_auth_limit",
            "Per-user authentication limit",
            RateLimitConfig::new(Algorithm::FixedWindow, Scope::PerUser, 5, 5 * 60_000, 30 * 60_000),
        )
        .with_description("Protects individual accounts from credential stuffing")
        .with_priority(3),
    ]
}

/// A standalone document of rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

impl RuleSet {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string. Every rule is validated.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: RuleSet = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse rate limit rules: {}", e)))?;

        for rule in &set.rules {
            rule.validate()?;
        }
        Ok(set)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| LimiterError::Config(e.to_string()))
    }
}

/// Registered rules in insertion order.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: RwLock<Vec<Arc<RateLimitRule>>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, replacing any rule with the same id in place.
    ///
    /// Returns the replaced rule, if any. A replacement keeps the original
    /// `created_at`.
    pub fn insert(&self, mut rule: RateLimitRule, now: DateTime<Utc>) -> Option<Arc<RateLimitRule>> {
        let mut rules = self.rules.write();
        rule.updated_at = now;

        match rules.iter().position(|r| r.id == rule.id) {
            Some(index) => {
                rule.created_at = rules[index].created_at;
                Some(std::mem::replace(&mut rules[index], Arc::new(rule)))
            }
            None => {
                rule.created_at = now;
                rules.push(Arc::new(rule));
                None
            }
        }
    }

    pub fn remove(&self, rule_id: &str) -> Option<Arc<RateLimitRule>> {
        let mut rules = self.rules.write();
        let index = rules.iter().position(|r| r.id == rule_id)?;
        Some(rules.remove(index))
    }

    /// Toggle a rule. Returns `false` if no such rule exists.
    pub fn set_active(&self, rule_id: &str, active: bool, now: DateTime<Utc>) -> bool {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule_id) {
            Some(slot) => {
                let mut rule = (**slot).clone();
                rule.active = active;
                rule.updated_at = now;
                *slot = Arc::new(rule);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, rule_id: &str) -> Option<Arc<RateLimitRule>> {
        self.rules.read().iter().find(|r| r.id == rule_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<RateLimitRule>> {
        self.rules.read().clone()
    }

    pub fn active(&self) -> Vec<Arc<RateLimitRule>> {
        self.rules.read().iter().filter(|r| r.active).cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.rules.read().iter().filter(|r| r.active).count()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn clear(&self) {
        self.rules.write().clear();
    }

    /// Active rules governing the identifier, highest priority first.
    ///
    /// Equal priorities keep registration order.
    pub fn find_applicable(
        &self,
        identifier: &str,
        context: &RequestContext,
    ) -> Vec<Arc<RateLimitRule>> {
        let mut applicable: Vec<Arc<RateLimitRule>> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.active && rule_applies(r, identifier, context))
            .cloned()
            .collect();

        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));
        applicable
    }

    /// Whether any active rule whitelists the identifier.
    pub fn whitelists(&self, identifier: &str) -> bool {
        self.rules
            .read()
            .iter()
            .any(|r| r.active && r.config.whitelist.contains(identifier))
    }

    /// Whether any active rule blacklists the identifier.
    pub fn blacklists(&self, identifier: &str) -> bool {
        self.rules
            .read()
            .iter()
            .any(|r| r.active && r.config.blacklist.contains(identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, scope: Scope, priority: i32) -> RateLimitRule {
        RateLimitRule::new(
            id,
            id,
            RateLimitConfig::new(Algorithm::FixedWindow, scope, 10, 1_000, 1_000),
        )
        .with_priority(priority)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules();
        assert_eq!(rules.len(), 3);

        let global = &rules[0];
        assert_eq!(global.config.algorithm, Algorithm::SlidingWindow);
        assert_eq!(global.config.scope, Scope::Global);
        assert_eq!(global.config.max_requests, 1000);
        assert_eq!(global.config.window_ms, 60_000);
        assert!(global.config.adaptive);
        assert_eq!(global.config.block_duration_ms, 300_000);

        let ip = &rules[1];
        assert_eq!(ip.config.algorithm, Algorithm::TokenBucket);
        assert_eq!(ip.config.scope, Scope::PerIp);
        assert_eq!(ip.config.burst(), 5);
        assert_eq!(ip.config.refill_rate, Some(0.1));
        assert_eq!(ip.config.block_duration_ms, 900_000);
        assert!(ip.config.adaptive);

        let user = &rules[2];
        assert_eq!(user.config.algorithm, Algorithm::FixedWindow);
        assert_eq!(user.config.scope, Scope::PerUser);
        assert_eq!(user.config.max_requests, 5);
        assert_eq!(user.config.window_ms, 300_000);
        assert_eq!(user.config.block_duration_ms, 1_800_000);
        assert!(!user.config.adaptive);

        for rule in &rules {
            assert!(rule.validate().is_ok());
        }
    }

    #[test]
    fn test_burst_defaults_to_max_requests() {
        let config = RateLimitConfig::new(Algorithm::TokenBucket, Scope::Global, 7, 1_000, 0);
        assert_eq!(config.burst(), 7);
    }

    #[test]
    fn test_validation() {
        let mut bad = rule("r", Scope::Global, 0);
        bad.config.max_requests = 0;
        assert!(matches!(bad.validate(), Err(LimiterError::InvalidRule(_))));

        let mut bad = rule("r", Scope::Global, 0);
        bad.config.window_ms = 0;
        assert!(bad.validate().is_err());

        let mut bad = rule("r", Scope::Global, 0);
        bad.config.load_threshold = 1.5;
        assert!(bad.validate().is_err());

        let bad = rule("  ", Scope::Global, 0);
        assert!(bad.validate().is_err());

        let mut adaptive = rule("r", Scope::Global, 0);
        adaptive.config.algorithm = Algorithm::Adaptive;
        assert!(adaptive.validate().is_ok());
    }

    #[test]
    fn test_rule_applies_by_scope() {
        let ctx = RequestContext::new()
            .with_source_ip("1.2.3.4")
            .with_user_id("alice");

        assert!(rule_applies(&rule("g", Scope::Global, 0), "anything", &ctx));
        assert!(rule_applies(&rule("ip", Scope::PerIp, 0), "1.2.3.4", &ctx));
        assert!(!rule_applies(&rule("ip", Scope::PerIp, 0), "alice", &ctx));
        assert!(rule_applies(&rule("u", Scope::PerUser, 0), "alice", &ctx));
        assert!(!rule_applies(&rule("s", Scope::PerSession, 0), "alice", &ctx));
    }

    #[test]
    fn test_find_applicable_sorted_by_priority() {
        let registry = RuleRegistry::new();
        registry.insert(rule("low", Scope::Global, 1), ts(0));
        registry.insert(rule("high", Scope::Global, 5), ts(0));
        registry.insert(rule("tie_a", Scope::Global, 3), ts(0));
        registry.insert(rule("tie_b", Scope::Global, 3), ts(0));
        registry.insert(rule("inactive", Scope::Global, 9).with_active(false), ts(0));

        let ids: Vec<String> = registry
            .find_applicable("x", &RequestContext::new())
            .iter()
            .map(|r| r.id.clone())
            .collect();

        assert_eq!(ids, vec!["high", "tie_a", "tie_b", "low"]);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let registry = RuleRegistry::new();
        registry.insert(rule("a", Scope::Global, 0), ts(10));
        registry.insert(rule("b", Scope::Global, 0), ts(20));

        let replaced = registry.insert(rule("a", Scope::Global, 7), ts(30));
        assert!(replaced.is_some());

        let all = registry.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].priority, 7);
        assert_eq!(all[0].created_at, ts(10));
        assert_eq!(all[0].updated_at, ts(30));
    }

    #[test]
    fn test_remove_and_set_active() {
        let registry = RuleRegistry::new();
        registry.insert(rule("a", Scope::Global, 0), ts(0));

        assert!(registry.set_active("a", false, ts(5)));
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.set_active("missing", true, ts(5)));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lists_only_count_active_rules() {
        let registry = RuleRegistry::new();
        let mut listed = rule("listed", Scope::Global, 0);
        listed.config.blacklist.insert("9.9.9.9".to_string());
        listed.config.whitelist.insert("10.0.0.1".to_string());
        registry.insert(listed, ts(0));

        assert!(registry.blacklists("9.9.9.9"));
        assert!(registry.whitelists("10.0.0.1"));

        registry.set_active("listed", false, ts(1));
        assert!(!registry.blacklists("9.9.9.9"));
        assert!(!registry.whitelists("10.0.0.1"));
    }

    #[test]
    fn test_parse_rule_set() {
        let yaml = r#"
rules:
  - id: login_ip
    name: Login attempts per IP
    priority: 10
    config:
      algorithm: token_bucket
      scope: per_ip
      max_requests: 10
      window_ms: 60000
      burst_size: 5
      refill_rate: 0.1
      block_duration_ms: 900000
      adaptive: true
      blacklist: ["6.6.6.6"]
  - id: login_user
    name: Login attempts per user
    config:
      algorithm: fixed_window
      scope: per_user
      max_requests: 5
      window_ms: 300000
      block_duration_ms: 1800000
"#;
        let set = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(set.rules.len(), 2);

        let ip = &set.rules[0];
        assert_eq!(ip.config.scope, Scope::PerIp);
        assert_eq!(ip.config.burst(), 5);
        assert_eq!(ip.config.load_threshold, 0.8);
        assert!(ip.config.blacklist.contains("6.6.6.6"));
        assert!(ip.active);

        let user = &set.rules[1];
        assert_eq!(user.priority, 0);
        assert!(!user.config.adaptive);
        assert_eq!(user.config.alert_thresholds, AlertThresholds::default());
    }

    #[test]
    fn test_parse_rule_set_rejects_invalid_rule() {
        let yaml = r#"
rules:
  - id: broken
    name: Broken
    config:
      algorithm: sliding_window
      scope: global
      max_requests: 0
      window_ms: 1000
      block_duration_ms: 1000
"#;
        assert!(matches!(
            RuleSet::from_yaml(yaml),
            Err(LimiterError::InvalidRule(_))
        ));
        assert!(matches!(
            RuleSet::from_yaml("rules: [oops"),
            Err(LimiterError::Config(_))
        ));
    }

    #[test]
    fn test_rule_set_yaml_round_trip_keeps_defaults() {
        let set = RuleSet {
            rules: default_rules(),
        };
        let yaml = set.to_yaml().unwrap();
        let parsed = RuleSet::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.rules, set.rules);
    }
}
