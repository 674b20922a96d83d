//! Realtime connection configuration

use serde::Deserialize;
use std::time::Duration;

use crate::domain::realtime::BackoffPolicy;

use super::error::ValidationError;

/// Realtime client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the realtime service
    pub endpoint: String,

    /// Delay before the first reconnect, in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for the exponential part of the delay, in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Maximum random jitter added to each delay (defaults to the base)
    pub backoff_jitter_ms: Option<u64>,

    /// How long a connection must stay up before backoff resets (defaults to 4 × base)
    pub stability_window_ms: Option<u64>,

    /// Expected server heartbeat cadence in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Time allowed for open + handshake, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Number of recent message ids remembered for duplicate suppression
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

impl RealtimeConfig {
    /// Default configuration pointed at `endpoint`
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Backoff policy described by this configuration
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let base = Duration::from_millis(self.backoff_base_ms);
        let mut policy = BackoffPolicy::new(base, Duration::from_millis(self.backoff_cap_ms));
        if let Some(jitter) = self.backoff_jitter_ms {
            policy = policy.with_jitter(Duration::from_millis(jitter));
        }
        if let Some(window) = self.stability_window_ms {
            policy = policy.with_stability_window(Duration::from_millis(window));
        }
        policy
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Get handshake timeout as Duration
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Validate realtime configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.endpoint.is_empty() {
            return Err(ValidationError::MissingRequired("REALTIME__ENDPOINT"));
        }
        if !self.endpoint.starts_with("ws://") && !self.endpoint.starts_with("wss://") {
            return Err(ValidationError::InvalidEndpoint);
        }
        if self.backoff_base_ms == 0 || self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ValidationError::InvalidBackoff);
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ValidationError::InvalidHeartbeatInterval);
        }
        if self.handshake_timeout_secs == 0 || self.handshake_timeout_secs > 300 {
            return Err(ValidationError::InvalidHandshakeTimeout);
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ValidationError::InvalidReconnectAttempts);
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            backoff_jitter_ms: None,
            stability_window_ms: None,
            heartbeat_interval_secs: default_heartbeat_interval(),
            handshake_timeout_secs: default_handshake_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            dedup_window: default_dedup_window(),
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_dedup_window() -> usize {
    100
}
