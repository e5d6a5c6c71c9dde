//! Configuration management for authlimit.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ratelimit::RateLimitRule;

/// Prefix for environment overrides, e.g. `AUTHLIMIT__LIMITER__CLEANUP_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "AUTHLIMIT";

/// Main configuration for the authlimit engine and binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthlimitConfig {
    /// Engine configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rules registered in addition to (or instead of) the defaults
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// How often expired blocks and idle counters are swept
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// How often the system load is sampled
    #[serde(default = "default_load_sample_interval")]
    pub load_sample_interval_secs: u64,

    /// Counters unused for this long are evicted on cleanup (0 keeps them forever)
    #[serde(default = "default_instance_idle_ttl")]
    pub instance_idle_ttl_secs: u64,

    /// Buffered notifications per subscriber
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Install the built-in authentication rule set at startup
    #[serde(default = "default_install_default_rules")]
    pub install_default_rules: bool,

    /// Identifiers that always pass
    #[serde(default)]
    pub whitelist: HashSet<String>,

    /// Identifiers that are always denied
    #[serde(default)]
    pub blacklist: HashSet<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
            load_sample_interval_secs: default_load_sample_interval(),
            instance_idle_ttl_secs: default_instance_idle_ttl(),
            notification_capacity: default_notification_capacity(),
            install_default_rules: default_install_default_rules(),
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
        }
    }
}

impl LimiterConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn load_sample_interval(&self) -> Duration {
        Duration::from_secs(self.load_sample_interval_secs.max(1))
    }

    /// Idle eviction threshold in milliseconds, `None` when disabled.
    pub fn instance_idle_ttl_ms(&self) -> Option<u64> {
        match self.instance_idle_ttl_secs {
            0 => None,
            secs => Some(secs.saturating_mul(1000)),
        }
    }
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_load_sample_interval() -> u64 {
    30
}

fn default_instance_idle_ttl() -> u64 {
    3600
}

fn default_notification_capacity() -> usize {
    1024
}

fn default_install_default_rules() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AuthlimitConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize::<AuthlimitConfig>()?;

        for rule in &config.rules {
            rule.validate()?;
        }
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AuthlimitConfig = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;

        for rule in &config.rules {
            rule.validate()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimiterError;
    use crate::ratelimit::Scope;

    #[test]
    fn test_defaults() {
        let config = AuthlimitConfig::default();
        assert_eq!(config.limiter.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.limiter.load_sample_interval(), Duration::from_secs(30));
        assert_eq!(config.limiter.instance_idle_ttl_ms(), Some(3_600_000));
        assert!(config.limiter.install_default_rules);
        assert_eq!(config.logging.level, "info");
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
limiter:
  cleanup_interval_secs: 60
  instance_idle_ttl_secs: 0
  install_default_rules: false
  blacklist: ["6.6.6.6"]
logging:
  level: debug
  json: true
rules:
  - id: session_limit
    name: Per-session limit
    priority: 4
    config:
      algorithm: sliding_window
      scope: per_session
      max_requests: 20
      window_ms: 60000
      block_duration_ms: 60000
"#;
        let config = AuthlimitConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.cleanup_interval_secs, 60);
        assert_eq!(config.limiter.load_sample_interval_secs, 30);
        assert_eq!(config.limiter.instance_idle_ttl_ms(), None);
        assert!(!config.limiter.install_default_rules);
        assert!(config.limiter.blacklist.contains("6.6.6.6"));
        assert!(config.logging.json);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].config.scope, Scope::PerSession);
    }

    #[test]
    fn test_from_yaml_rejects_invalid_rule() {
        let yaml = r#"
rules:
  - id: zero
    name: Zero window
    config:
      algorithm: fixed_window
      scope: global
      max_requests: 1
      window_ms: 0
      block_duration_ms: 1000
"#;
        assert!(matches!(
            AuthlimitConfig::from_yaml(yaml),
            Err(LimiterError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = AuthlimitConfig::load(None).unwrap();
        assert_eq!(config.limiter.notification_capacity, 1024);
    }
}
