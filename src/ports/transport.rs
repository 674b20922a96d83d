//! Transport port - Interface for the bidirectional frame connection.
//!
//! The connection manager never touches sockets directly. A [`Connector`]
//! dials an endpoint and hands back independent send and receive halves so
//! the receive side can run on its own task while the manager keeps the
//! send side.

use async_trait::async_trait;

use crate::domain::realtime::TransportError;

/// Sending half of an open transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Closes the transport. Errors are ignored; the transport is being discarded.
    async fn close(&mut self);
}

/// Receiving half of an open transport.
#[async_trait]
pub trait FrameStream: Send {
    /// Waits for the next text frame.
    ///
    /// Returns `None` once the peer has closed the transport.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// An opened transport split into its two halves.
pub struct TransportHalves {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl TransportHalves {
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

/// Port for opening transports.
///
/// # Example
///
/// ```ignore
/// let halves = connector.open("wss://dashboard.example.com/ws").await?;
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new transport to `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<TransportHalves, TransportError>;
}
