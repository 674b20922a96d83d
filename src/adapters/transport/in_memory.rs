//! In-memory transport for testing.
//!
//! Each dial made through [`InMemoryConnector`] shows up on the paired
//! [`ServerEndpoint`] as a [`ServerConnection`] that a test drives by hand:
//! read the client's frames, push server frames, drop or fail the link.
//!
//! # Example
//!
//! ```ignore
//! let (connector, mut server) = InMemoryConnector::pair();
//! let client = RealtimeClient::new(config, Arc::new(connector));
//!
//! let (result, mut conn) = tokio::join!(client.connect("tok-1"), async {
//!     let mut conn = server.accept().await.unwrap();
//!     conn.recv().await; // connect frame
//!     conn.send(ServerFrame::ConnectAck);
//!     conn
//! });
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::domain::realtime::{ClientFrame, ServerFrame, TransportError};
use crate::ports::{Connector, FrameSink, FrameStream, TransportHalves};

#[derive(Debug, Default)]
struct Switches {
    refusing: AtomicBool,
    dials: AtomicUsize,
}

/// Client half: dials connections that the paired endpoint accepts.
#[derive(Clone)]
pub struct InMemoryConnector {
    incoming: mpsc::UnboundedSender<ServerConnection>,
    switches: Arc<Switches>,
}

/// Server half: accepts connections dialed by the paired connector.
pub struct ServerEndpoint {
    incoming: mpsc::UnboundedReceiver<ServerConnection>,
    switches: Arc<Switches>,
}

impl InMemoryConnector {
    /// Creates a connected connector/endpoint pair.
    pub fn pair() -> (Self, ServerEndpoint) {
        let (tx, rx) = mpsc::unbounded_channel();
        let switches = Arc::new(Switches::default());
        (
            Self {
                incoming: tx,
                switches: switches.clone(),
            },
            ServerEndpoint {
                incoming: rx,
                switches,
            },
        )
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn open(&self, endpoint: &str) -> Result<TransportHalves, TransportError> {
        self.switches.dials.fetch_add(1, Ordering::SeqCst);
        if self.switches.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(format!("{endpoint} refused the connection")));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let connection = ServerConnection {
            from_client,
            to_client,
        };
        self.incoming
            .send(connection)
            .map_err(|_| TransportError::Connect(format!("{endpoint} is not listening")))?;

        Ok(TransportHalves::new(
            InMemorySink { tx: Some(to_server) },
            InMemoryStream { rx: from_server },
        ))
    }
}

impl ServerEndpoint {
    /// Waits for the next dial. `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.incoming.recv().await
    }

    /// Returns a dial that already happened, without waiting.
    pub fn try_accept(&mut self) -> Option<ServerConnection> {
        self.incoming.try_recv().ok()
    }

    /// While set, every dial fails with [`TransportError::Connect`].
    pub fn set_refusing(&self, refusing: bool) {
        self.switches.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of dials attempted so far, refused ones included.
    pub fn dial_count(&self) -> usize {
        self.switches.dials.load(Ordering::SeqCst)
    }
}

/// Server side of one in-memory connection.
///
/// Dropping it closes the client's stream.
pub struct ServerConnection {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ServerConnection {
    /// Next client frame, decoded. `None` once the client closed its sink.
    ///
    /// # Panics
    ///
    /// Panics if the client sent something that is not a [`ClientFrame`].
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        let text = self.from_client.recv().await?;
        Some(serde_json::from_str(&text).expect("client sent an undecodable frame"))
    }

    /// Returns a frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<ClientFrame> {
        let text = self.from_client.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Pushes a server frame to the client. Ignored if the client is gone.
    pub fn send(&self, frame: ServerFrame) {
        if let Ok(text) = serde_json::to_string(&frame) {
            self.send_text(text);
        }
    }

    /// Pushes raw text, e.g. a malformed frame.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Ok(text.into()));
    }

    /// Fails the client's stream with `error`.
    pub fn fail(&self, error: TransportError) {
        let _ = self.to_client.send(Err(error));
    }

    /// Returns true once the client closed or dropped its sink.
    pub fn is_closed_by_client(&mut self) -> bool {
        matches!(
            self.from_client.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }
}

struct InMemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for InMemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text)
            .map_err(|_| TransportError::Send("server dropped the connection".to_string()))
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct InMemoryStream {
    rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

#[async_trait]
impl FrameStream for InMemoryStream {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (connector, mut server) = InMemoryConnector::pair();
        let TransportHalves { mut sink, mut stream } = connector.open("mem://test").await.unwrap();
        let mut conn = server.accept().await.unwrap();

        let hello = ClientFrame::Connect {
            credential: "tok-1".to_string(),
        };
        sink.send_text(hello.encode().unwrap()).await.unwrap();
        assert_eq!(conn.recv().await, Some(hello));

        conn.send(ServerFrame::ConnectAck);
        let text = stream.next_text().await.unwrap().unwrap();
        assert_eq!(ServerFrame::decode(&text).unwrap(), ServerFrame::ConnectAck);
    }

    #[tokio::test]
    async fn dropping_the_server_side_ends_the_stream() {
        let (connector, mut server) = InMemoryConnector::pair();
        let TransportHalves { mut stream, .. } = connector.open("mem://test").await.unwrap();
        drop(server.accept().await.unwrap());

        assert!(stream.next_text().await.is_none());
    }

    #[tokio::test]
    async fn refusing_endpoint_fails_dials_and_counts_them() {
        let (connector, server) = InMemoryConnector::pair();
        server.set_refusing(true);

        let result = connector.open("mem://test").await;

        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(server.dial_count(), 1);
    }

    #[tokio::test]
    async fn closing_the_sink_is_visible_to_the_server() {
        let (connector, mut server) = InMemoryConnector::pair();
        let TransportHalves { mut sink, .. } = connector.open("mem://test").await.unwrap();
        let mut conn = server.accept().await.unwrap();

        sink.close().await;

        assert!(conn.is_closed_by_client());
        assert_eq!(sink.send_text("x".into()).await, Err(TransportError::Closed));
    }
}
