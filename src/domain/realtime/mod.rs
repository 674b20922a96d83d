//! Realtime domain - vocabulary of the topic subscription client.
//!
//! # Components
//!
//! - [`connection_state`] - Connection lifecycle states and legal transitions
//! - [`backoff`] - Reconnect delay policy and per-client retry bookkeeping
//! - [`credential`] - Opaque authentication token
//! - [`topic`] - Validated topic names
//! - [`message`] - Delivered data messages
//! - [`frames`] - JSON wire frames
//! - [`errors`] - Error taxonomy

pub mod backoff;
pub mod connection_state;
pub mod credential;
pub mod errors;
pub mod frames;
pub mod message;
pub mod topic;

pub use backoff::{BackoffPolicy, BackoffState};
pub use connection_state::ConnectionState;
pub use credential::Credential;
pub use errors::{ProtocolError, RealtimeError, SubscriptionError, TransportError};
pub use frames::{ClientFrame, ServerFrame};
pub use message::Message;
pub use topic::Topic;
