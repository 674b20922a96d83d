//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::domain::realtime::TransportError;
use crate::ports::{Connector, FrameSink, FrameStream, TransportHalves};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket per dial. Only text frames carry protocol data;
/// WebSocket-level ping/pong is answered by tungstenite itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &str) -> Result<TransportHalves, TransportError> {
        let (ws, response) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(endpoint, status = %response.status(), "WebSocket opened");

        let (tx, rx) = ws.split();
        Ok(TransportHalves::new(WsSink { tx }, WsFrames { rx }))
    }
}

struct WsSink {
    tx: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.tx.close().await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}

struct WsFrames {
    rx: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.rx.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Close(frame)) => {
                    tracing::debug!(?frame, "WebSocket closed by server");
                    return None;
                }
                // Binary frames are not part of the protocol; control frames are handled below us.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connect_error() {
        let connector = WebSocketConnector::new();
        let result = connector.open("ws://127.0.0.1:1/realtime").await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn malformed_url_is_a_connect_error() {
        let connector = WebSocketConnector::new();
        assert!(matches!(
            connector.open("not a url").await,
            Err(TransportError::Connect(_))
        ));
    }
}
