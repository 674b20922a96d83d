//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the client core and the outside world. Adapters implement these ports.
//!
//! ## Transport Ports
//!
//! - `Connector` - Dials the realtime endpoint
//! - `FrameSink` - Sends text frames on an open transport
//! - `FrameStream` - Receives text frames from an open transport

mod transport;

pub use transport::{Connector, FrameSink, FrameStream, TransportHalves};
