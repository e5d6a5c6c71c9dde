//! Error types for the authlimit engine.

use thiserror::Error;

/// Main error type for authlimit operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Process configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule failed validation when it was registered
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// A rule names an algorithm the engine cannot run
    #[error("Unsupported algorithm: {0}")]
    Configuration(String),

    /// Unexpected failure while evaluating a request
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// The engine has been destroyed and no longer accepts calls
    #[error("Rate limiter has been destroyed")]
    Destroyed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for authlimit operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
