//! Connection lifecycle state.
//!
//! ```text
//! Disconnected --connect--> Connecting --ack--> Connected
//! Connecting --reject--> Closed
//! Connecting | Connected --failure--> Reconnecting | Closed (exhausted)
//! Connected --stale / shutdown--> Reconnecting
//! Reconnecting --backoff elapsed / connect--> Connecting
//! Connected --connect(new credential)--> Connecting
//! any --close--> Closed
//! ```

use serde::Serialize;
use std::fmt;

use crate::domain::foundation::StateMachine;

/// Current lifecycle state of a realtime client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport and no connect requested yet.
    #[default]
    Disconnected,
    /// Transport being opened or handshake in flight.
    Connecting,
    /// Handshake acknowledged; frames are being dispatched.
    Connected,
    /// Waiting for the backoff timer before the next dial.
    Reconnecting,
    /// Terminal. The client cannot be reused.
    Closed,
}

impl ConnectionState {
    /// Returns true while a transport is being established or is live.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl StateMachine for ConnectionState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (Disconnected, Connecting)
                | (Disconnected, Closed)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Closed)
                | (Connected, Connecting)
                | (Connected, Reconnecting)
                | (Connected, Closed)
                | (Reconnecting, Connecting)
                | (Reconnecting, Closed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use ConnectionState::*;
        match self {
            Disconnected => vec![Connecting, Closed],
            Connecting => vec![Connected, Reconnecting, Closed],
            Connected => vec![Connecting, Reconnecting, Closed],
            Reconnecting => vec![Connecting, Closed],
            Closed => vec![],
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL: [ConnectionState; 5] = [Disconnected, Connecting, Connected, Reconnecting, Closed];

    #[test]
    fn closed_is_the_only_terminal_state() {
        for state in ALL {
            assert_eq!(state.is_terminal(), state == Closed, "{:?}", state);
        }
    }

    #[test]
    fn nothing_leaves_closed() {
        for target in ALL {
            assert!(Closed.transition_to(target).is_err());
        }
    }

    #[test]
    fn every_state_but_closed_can_close() {
        for state in [Disconnected, Connecting, Connected, Reconnecting] {
            assert!(state.can_transition_to(&Closed));
        }
    }

    #[test]
    fn reconnecting_only_proceeds_through_connecting() {
        assert!(Reconnecting.transition_to(Connecting).is_ok());
        assert!(Reconnecting.transition_to(Connected).is_err());
    }

    #[test]
    fn can_transition_to_is_consistent_with_valid_transitions() {
        for state in ALL {
            for target in ALL {
                assert_eq!(
                    state.can_transition_to(&target),
                    state.valid_transitions().contains(&target),
                    "{:?} -> {:?}",
                    state,
                    target
                );
            }
        }
    }

    #[test]
    fn displays_and_serializes_snake_case() {
        assert_eq!(Reconnecting.to_string(), "reconnecting");
        assert_eq!(serde_json::to_string(&Connected).unwrap(), r#""connected""#);
    }

    #[test]
    fn is_active_covers_connecting_and_connected() {
        assert!(Connecting.is_active());
        assert!(Connected.is_active());
        assert!(!Reconnecting.is_active());
        assert!(!Disconnected.is_active());
    }
}
