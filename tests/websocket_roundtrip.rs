//! WebSocket round trip against a real socket.
//!
//! Spins up a minimal realtime server with axum on an ephemeral port and
//! drives the production `WebSocketConnector` through handshake, replay,
//! heartbeat and data delivery.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use recruit_realtime::adapters::WebSocketConnector;
use recruit_realtime::config::RealtimeConfig;
use recruit_realtime::{ConnectionState, Message, RealtimeClient, RealtimeError};

// =============================================================================
// Test Server
// =============================================================================

async fn realtime(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(serve_client)
}

async fn next_json(socket: &mut WebSocket) -> Option<Value> {
    while let Some(Ok(frame)) = socket.recv().await {
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).ok();
        }
    }
    None
}

async fn send_json(socket: &mut WebSocket, value: Value) {
    let _ = socket.send(WsMessage::Text(value.to_string())).await;
}

/// Handshake, echo one message per replayed topic, then one ping. The pong's
/// `ts` is reported back on the `heartbeat` topic.
async fn serve_client(mut socket: WebSocket) {
    let Some(hello) = next_json(&mut socket).await else { return };
    if hello["credential"] == "tok-bad" {
        send_json(&mut socket, json!({"type": "connect_reject", "reason": "expired"})).await;
        return;
    }
    send_json(&mut socket, json!({"type": "connect_ack"})).await;

    let Some(subscribe) = next_json(&mut socket).await else { return };
    let topics: Vec<String> = subscribe["topics"]
        .as_array()
        .map(|ts| ts.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    for topic in &topics {
        send_json(
            &mut socket,
            json!({"type": "message", "topic": topic, "payload": {"status": "ok"}, "ts": 1, "message_id": format!("{topic}-1")}),
        )
        .await;
    }

    send_json(&mut socket, json!({"type": "ping", "ts": 7})).await;
    while let Some(frame) = next_json(&mut socket).await {
        if frame["type"] == "pong" {
            send_json(
                &mut socket,
                json!({"type": "message", "topic": "heartbeat", "payload": {"pong": frame["ts"]}, "ts": 2}),
            )
            .await;
        }
    }
}

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/realtime", get(realtime));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/realtime")
}

fn client_for(endpoint: String) -> RealtimeClient {
    let mut config = RealtimeConfig::for_endpoint(endpoint);
    config.handshake_timeout_secs = 5;
    RealtimeClient::new(config, Arc::new(WebSocketConnector::new()))
}

async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery within 5s")
        .expect("subscription alive")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn websocket_client_completes_handshake_and_receives_topic_data() {
    let client = client_for(spawn_server().await);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _health = client
        .subscribe("health", move |msg| {
            let _ = tx.send(msg.clone());
        })
        .unwrap();

    client.connect("tok-1").await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let message = next_delivery(&mut rx).await;
    assert_eq!(message.topic.as_str(), "health");
    assert_eq!(message.payload, json!({"status": "ok"}));
    assert_eq!(message.message_id.as_deref(), Some("health-1"));

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn websocket_client_answers_server_heartbeat() {
    let client = client_for(spawn_server().await);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _heartbeat = client
        .subscribe("heartbeat", move |msg| {
            let _ = tx.send(msg.clone());
        })
        .unwrap();

    client.connect("tok-1").await.unwrap();

    // First delivery is the replay echo, second is the pong report.
    let _replayed = next_delivery(&mut rx).await;
    let report = next_delivery(&mut rx).await;
    assert_eq!(report.payload, json!({"pong": 7}));
    assert_eq!(client.stats().heartbeats, 1);

    client.close().await;
}

#[tokio::test]
async fn websocket_client_surfaces_rejected_credential() {
    let client = client_for(spawn_server().await);

    let result = client.connect("tok-bad").await;

    assert_eq!(
        result,
        Err(RealtimeError::Auth {
            reason: "expired".to_string()
        })
    );
    assert_eq!(client.state(), ConnectionState::Closed);
}
