//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Realtime endpoint must use ws:// or wss://")]
    InvalidEndpoint,

    #[error("Backoff base must be positive and not exceed the cap")]
    InvalidBackoff,

    #[error("Heartbeat interval must be positive")]
    InvalidHeartbeatInterval,

    #[error("Invalid handshake timeout")]
    InvalidHandshakeTimeout,

    #[error("Maximum reconnect attempts must be at least 1")]
    InvalidReconnectAttempts,

    #[error("Invalid log filter directive: {0}")]
    InvalidLogFilter(String),
}
