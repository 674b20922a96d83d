//! WebSocket transport for talking to the dashboard realtime server.

mod connector;

pub use connector::WebSocketConnector;
