//! Public façade over the connection manager and topic registry.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::RealtimeConfig;
use crate::domain::realtime::{ConnectionState, Credential, Message, RealtimeError, Topic};
use crate::ports::Connector;

use super::manager::{Command, ConnectionManager, FailureHandler};
use super::registry::{Callback, SubscriptionHandle, TopicRegistry};
use super::stats::{ConnectionStats, StatsRecorder};

/// Real-time topic subscription client.
///
/// Each client owns exactly one logical connection, driven by a background
/// task spawned on construction. Dropping the client shuts that task down.
///
/// # Example
///
/// ```ignore
/// let client = RealtimeClient::new(config, Arc::new(WebSocketConnector::new()));
/// let health = client.subscribe("health", |msg| println!("{}", msg.payload))?;
/// client.connect("tok-1").await?;
/// // ...
/// health.dispose();
/// client.close().await;
/// ```
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    registry: TopicRegistry,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<StatsRecorder>,
}

impl RealtimeClient {
    /// Creates a client. Must be called within a tokio runtime.
    pub fn new(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Self {
        Self::spawn(config, connector, None)
    }

    /// Creates a client that reports terminal failures to `handler`.
    ///
    /// The handler runs on the connection task once the client has reached
    /// `Closed` because the credential was rejected or reconnects ran out.
    pub fn with_failure_handler<F>(config: RealtimeConfig, connector: Arc<dyn Connector>, handler: F) -> Self
    where
        F: Fn(&RealtimeError) + Send + Sync + 'static,
    {
        Self::spawn(config, connector, Some(Arc::new(handler)))
    }

    fn spawn(config: RealtimeConfig, connector: Arc<dyn Connector>, failure_handler: Option<FailureHandler>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let registry = TopicRegistry::new();
        let stats = Arc::new(StatsRecorder::new());

        let manager = ConnectionManager::new(
            config,
            connector,
            registry.clone(),
            state_tx,
            stats.clone(),
            failure_handler,
            commands_rx,
        );
        tokio::spawn(manager.run());

        Self {
            commands: commands_tx,
            registry,
            state: state_rx,
            stats,
        }
    }

    /// Connects with `credential`, resolving once the server acknowledges.
    ///
    /// Transport failures are retried under backoff and only surface as
    /// [`RealtimeError::ReconnectExhausted`]. A rejected credential surfaces
    /// as [`RealtimeError::Auth`] and closes the client. Calling this with a
    /// different credential while connected forces a fresh transport.
    pub async fn connect(&self, credential: impl Into<Credential>) -> Result<(), RealtimeError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                credential: credential.into(),
                reply,
            })
            .map_err(|_| RealtimeError::ClientClosed)?;
        outcome.await.map_err(|_| RealtimeError::ClientClosed)?
    }

    /// Closes the client. Subscriptions are disposed and timers cancelled
    /// before this resolves. Idempotent.
    pub async fn close(&self) {
        self.registry.close();
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Registers `callback` for messages on `topic`.
    ///
    /// Works in any non-closed state; the server learns about a new topic
    /// when the client is next `Connected`.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.registry.subscribe(topic, callback)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Sorted topics with at least one live subscription.
    pub fn topics(&self) -> Vec<Topic> {
        self.registry.topics()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.state())
            .field("subscriptions", &self.registry.subscription_count())
            .finish()
    }
}
