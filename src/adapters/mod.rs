//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the client core to the outside world:
//! - `websocket` - Production transport over `tokio-tungstenite`
//! - `transport` - In-memory transport for tests

pub mod transport;
pub mod websocket;

pub use transport::{InMemoryConnector, ServerConnection, ServerEndpoint};
pub use websocket::WebSocketConnector;
