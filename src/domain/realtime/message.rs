//! Data messages delivered to subscribers.

use serde_json::Value;

use crate::domain::foundation::{Generation, Timestamp};

use super::Topic;

/// A data frame accepted for dispatch.
///
/// `payload` is opaque to the client; validating it is the subscriber's job.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: Topic,
    pub payload: Value,
    /// Server-side `ts` field, passed through untouched.
    pub server_timestamp: Option<Value>,
    /// Server-assigned id used for duplicate suppression, when present.
    pub message_id: Option<String>,
    /// Transport generation the frame arrived on.
    pub generation: Generation,
    pub received_at: Timestamp,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(topic: Topic, payload: Value, generation: Generation) -> Self {
        Self {
            topic,
            payload,
            server_timestamp: None,
            message_id: None,
            generation,
            received_at: Timestamp::now(),
        }
    }

    /// Attaches the server timestamp.
    pub fn with_server_timestamp(mut self, ts: Option<Value>) -> Self {
        self.server_timestamp = ts;
        self
    }

    /// Attaches the server message id.
    pub fn with_message_id(mut self, id: Option<String>) -> Self {
        self.message_id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_keeps_payload_unchanged() {
        let msg = Message::new(Topic::new("health").unwrap(), json!({"status": "ok"}), Generation::from_u64(3))
            .with_server_timestamp(Some(json!(1700000000.5)))
            .with_message_id(Some("msg-1".to_string()));

        assert_eq!(msg.payload, json!({"status": "ok"}));
        assert_eq!(msg.server_timestamp, Some(json!(1700000000.5)));
        assert_eq!(msg.message_id.as_deref(), Some("msg-1"));
        assert_eq!(msg.generation.as_u64(), 3);
    }
}
