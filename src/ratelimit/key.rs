//! Request context and counter key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::rules::{RateLimitRule, Scope};

/// Attributes of the request being checked.
///
/// Scoped rules compare the checked identifier against the matching field:
/// a per-IP rule only applies when `source_ip` equals the identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// The context field a scope is tracked by. Global has none.
    pub fn scoped_value(&self, scope: Scope) -> Option<&str> {
        match scope {
            Scope::Global => None,
            Scope::PerUser => self.user_id.as_deref(),
            Scope::PerIp => self.source_ip.as_deref(),
            Scope::PerSession => self.session_id.as_deref(),
        }
    }
}

/// A key that identifies one counter instance.
///
/// The rule id is kept in the clear so that removing a rule can evict its
/// counters; everything else is folded into a SHA-256 digest so identifiers
/// never sit in memory as raw map keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The rule this counter belongs to
    pub rule_id: String,
    /// Hex-encoded digest over rule id, scope, identifier and scoped context
    pub digest: String,
}

impl CounterKey {
    /// Derive the key for a rule and identifier.
    pub fn new(rule: &RateLimitRule, identifier: &str, context: &RequestContext) -> Self {
        let scope = rule.config.scope;

        let mut hasher = Sha256::new();
        for part in [
            rule.id.as_str(),
            scope.as_str(),
            identifier,
            context.scoped_value(scope).unwrap_or(""),
        ] {
            // Length-prefix each part so ("ab", "c") and ("a", "bc") differ
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }

        Self {
            rule_id: rule.id.clone(),
            digest: hex::encode(hasher.finalize()),
        }
    }

    /// Convert the key to a string representation for logging.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.rule_id, &self.digest[..16.min(self.digest.len())])
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::default_rules;

    fn rule(id: &str) -> RateLimitRule {
        default_rules()
            .into_iter()
            .find(|r| r.id == id)
            .unwrap()
    }

    #[test]
    fn test_counter_key_is_stable() {
        let rule = rule("ip_auth_limit");
        let ctx = RequestContext::new().with_source_ip("10.0.0.1");

        let key1 = CounterKey::new(&rule, "10.0.0.1", &ctx);
        let key2 = CounterKey::new(&rule, "10.0.0.1", &ctx);

        assert_eq!(key1, key2);
        assert_eq!(key1.rule_id, "ip_auth_limit");
        assert_eq!(key1.digest.len(), 64);
    }

    #[test]
    fn test_counter_key_differs_by_identifier_and_rule() {
        let ip_rule = rule("ip_auth_limit");
        let global_rule = rule("global_auth_limit");
        let ctx = RequestContext::new().with_source_ip("10.0.0.1");

        let a = CounterKey::new(&ip_rule, "10.0.0.1", &ctx);
        let b = CounterKey::new(&ip_rule, "10.0.0.2", &ctx);
        let c = CounterKey::new(&global_rule, "10.0.0.1", &ctx);

        assert_ne!(a, b);
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn test_user_agent_does_not_split_counters() {
        let rule = rule("ip_auth_limit");
        let plain = RequestContext::new().with_source_ip("10.0.0.1");
        let with_agent = plain.clone().with_user_agent("curl/8.0");

        assert_eq!(
            CounterKey::new(&rule, "10.0.0.1", &plain),
            CounterKey::new(&rule, "10.0.0.1", &with_agent)
        );
    }

    #[test]
    fn test_scoped_value() {
        let ctx = RequestContext::new()
            .with_user_id("alice")
            .with_session_id("s-1")
            .with_source_ip("192.168.1.1");

        assert_eq!(ctx.scoped_value(Scope::Global), None);
        assert_eq!(ctx.scoped_value(Scope::PerUser), Some("alice"));
        assert_eq!(ctx.scoped_value(Scope::PerSession), Some("s-1"));
        assert_eq!(ctx.scoped_value(Scope::PerIp), Some("192.168.1.1"));
    }

    #[test]
    fn test_key_display_is_truncated() {
        let rule = rule("user_auth_limit");
        let ctx = RequestContext::new().with_user_id("bob");
        let key = CounterKey::new(&rule, "bob", &ctx);

        let display = key.to_string();
        assert!(display.starts_with("user_auth_limit:"));
        assert_eq!(display.len(), "user_auth_limit:".len() + 16);
    }
}
