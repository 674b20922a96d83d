//! Wire frames exchanged with the realtime server.
//!
//! One JSON text frame per transport message, tagged by `type`:
//! - Client → Server: `connect`, `pong`, `subscribe`
//! - Server → Client: `connect_ack`, `connect_reject`, `ping`, `message`, `shutdown`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ProtocolError, Topic};

// ============================================
// Client → Server Frames
// ============================================

/// All frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake opener carrying the credential.
    Connect { credential: String },

    /// Heartbeat reply echoing the server's `ts`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<Value>,
    },

    /// Full set of topics this client wants.
    Subscribe { topics: Vec<Topic> },
}

impl ClientFrame {
    /// Serializes the frame to its JSON text form.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Frame kind for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Connect { .. } => "connect",
            ClientFrame::Pong { .. } => "pong",
            ClientFrame::Subscribe { .. } => "subscribe",
        }
    }
}

// ============================================
// Server → Client Frames
// ============================================

/// All frames the server may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Credential accepted.
    ConnectAck,

    /// Credential refused. Terminal.
    ConnectReject {
        #[serde(default)]
        reason: String,
    },

    /// Heartbeat.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<Value>,
    },

    /// Data for one topic.
    Message {
        topic: String,
        #[serde(default)]
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// Server is going away and asks the client to come back now.
    Shutdown {
        #[serde(default)]
        reason: String,
    },
}

impl ServerFrame {
    /// Parses one JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Frame kind for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::ConnectAck => "connect_ack",
            ServerFrame::ConnectReject { .. } => "connect_reject",
            ServerFrame::Ping { .. } => "ping",
            ServerFrame::Message { .. } => "message",
            ServerFrame::Shutdown { .. } => "shutdown",
        }
    }
}
