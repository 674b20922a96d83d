//! # recruit-realtime
//!
//! Connects to the dashboard realtime server, subscribes to the configured
//! topics and logs every delivery until Ctrl-C.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use recruit_realtime::adapters::WebSocketConnector;
use recruit_realtime::config::AppConfig;
use recruit_realtime::{telemetry, RealtimeClient};

const TOKEN_VAR: &str = "RECRUIT_REALTIME_TOKEN";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    telemetry::init_tracing(&config.logging);

    let token = std::env::var(TOKEN_VAR).with_context(|| format!("{TOKEN_VAR} is not set"))?;
    let topics = config.topic_list();
    if topics.is_empty() {
        bail!("No topics configured; set RECRUIT_REALTIME__TOPICS");
    }

    let client = RealtimeClient::with_failure_handler(
        config.realtime.clone(),
        Arc::new(WebSocketConnector::new()),
        |error| tracing::error!(code = error.code(), error = %error, "Realtime client stopped"),
    );

    let mut handles = Vec::with_capacity(topics.len());
    for topic in &topics {
        let handle = client.subscribe(topic, |message| {
            tracing::info!(
                topic = %message.topic,
                generation = %message.generation,
                message_id = message.message_id.as_deref(),
                payload = %message.payload,
                "Message received"
            );
        })?;
        handles.push(handle);
    }

    let mut states = client.state_changes();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(state = %state, "Connection state");
        }
    });

    tracing::info!(endpoint = %config.realtime.endpoint, topics = ?topics, "Connecting");
    tokio::select! {
        result = client.connect(token) => {
            result.context("Connection failed")?;
            tracing::info!("Connected; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        }
        signal = tokio::signal::ctrl_c() => signal.context("Failed to listen for Ctrl-C")?,
    }

    client.close().await;
    tracing::info!(stats = ?client.stats(), "Stopped");
    Ok(())
}
