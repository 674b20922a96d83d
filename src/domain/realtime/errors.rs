//! Error taxonomy for the realtime client.
//!
//! Only [`RealtimeError::Auth`] and [`RealtimeError::ReconnectExhausted`]
//! ever reach a consumer as failures. Transport, protocol and staleness
//! errors are absorbed by the reconnect pipeline.

use std::time::Duration;
use thiserror::Error;

use crate::domain::foundation::Generation;

/// Network-level failure. Retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to open transport: {0}")]
    Connect(String),

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Failed to receive frame: {0}")]
    Receive(String),

    #[error("Handshake not answered within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Transport closed by peer")]
    Closed,
}

/// Malformed or unexpected frame. The frame is dropped, the connection kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unexpected '{frame}' frame while {state}")]
    Unexpected { frame: &'static str, state: String },
}

/// Invalid argument to `subscribe`. Rejected before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
}

/// Top-level error for realtime client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    #[error("Credential rejected: {reason}")]
    Auth { reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Connection generation {generation} silent for {silent_for:?}")]
    StaleConnection {
        generation: Generation,
        silent_for: Duration,
    },

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("Gave up after {attempts} reconnect attempts: {last_error}")]
    ReconnectExhausted {
        attempts: u32,
        last_error: Box<RealtimeError>,
    },

    #[error("Client is closed")]
    ClientClosed,
}

impl RealtimeError {
    /// Returns true for failures that should drive backoff and another dial.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RealtimeError::Transport(_) | RealtimeError::StaleConnection { .. }
        )
    }

    /// Returns true for failures that end the client.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RealtimeError::Auth { .. }
                | RealtimeError::ReconnectExhausted { .. }
                | RealtimeError::ClientClosed
        )
    }

    /// Stable code for logs and UI mapping.
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::Auth { .. } => "AUTH_REJECTED",
            RealtimeError::Transport(_) => "TRANSPORT_ERROR",
            RealtimeError::Protocol(_) => "PROTOCOL_ERROR",
            RealtimeError::StaleConnection { .. } => "STALE_CONNECTION",
            RealtimeError::Subscription(_) => "INVALID_SUBSCRIPTION",
            RealtimeError::ReconnectExhausted { .. } => "RECONNECT_EXHAUSTED",
            RealtimeError::ClientClosed => "CLIENT_CLOSED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_staleness_are_retryable() {
        assert!(RealtimeError::from(TransportError::Closed).is_retryable());
        assert!(RealtimeError::StaleConnection {
            generation: Generation::from_u64(1),
            silent_for: Duration::from_secs(60),
        }
        .is_retryable());
        assert!(!RealtimeError::Auth { reason: "expired".into() }.is_retryable());
        assert!(!RealtimeError::from(ProtocolError::Malformed("x".into())).is_retryable());
        assert!(!RealtimeError::from(SubscriptionError::EmptyTopic).is_retryable());
    }

    #[test]
    fn auth_and_exhaustion_are_terminal() {
        assert!(RealtimeError::Auth { reason: "bad".into() }.is_terminal());
        assert!(RealtimeError::ReconnectExhausted {
            attempts: 3,
            last_error: Box::new(TransportError::Closed.into()),
        }
        .is_terminal());
        assert!(!RealtimeError::from(TransportError::Closed).is_terminal());
    }

    #[test]
    fn errors_display_with_context() {
        let err = RealtimeError::ReconnectExhausted {
            attempts: 5,
            last_error: Box::new(TransportError::Connect("connection refused".into()).into()),
        };
        assert_eq!(
            err.to_string(),
            "Gave up after 5 reconnect attempts: Failed to open transport: connection refused"
        );
        assert_eq!(err.code(), "RECONNECT_EXHAUSTED");
        assert_eq!(
            RealtimeError::from(SubscriptionError::EmptyTopic).to_string(),
            "Topic cannot be empty"
        );
    }
}
