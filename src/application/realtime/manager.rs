//! Connection manager - the single task that owns a client's connection.
//!
//! Every state change for one client happens on this task, driven by:
//! - commands from the [`RealtimeClient`](super::RealtimeClient) façade
//! - generation-tagged events from the current transport's reader task
//! - backoff, handshake and staleness deadlines
//! - topic-set changes signalled by the registry
//!
//! ```text
//!   RealtimeClient ──Command──▶ ┌──────────────────────┐ ◀──Inbound{gen}── transport task (gen N)
//!                               │  ConnectionManager   │ ◀──Inbound{gen}── transport task (gen N-1, discarded)
//!   TopicRegistry ──changed───▶ │  state / backoff /   │
//!                               │  health / timers     │ ──dispatch──▶ TopicRegistry
//!                               └──────────────────────┘ ──frames───▶ FrameSink (gen N)
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RealtimeConfig;
use crate::domain::foundation::{Generation, StateMachine};
use crate::domain::realtime::{
    BackoffPolicy, BackoffState, ClientFrame, ConnectionState, Credential, Message, ProtocolError,
    RealtimeError, ServerFrame, Topic, TransportError,
};
use crate::ports::{Connector, FrameSink, TransportHalves};

use super::dedup::RecentMessageIds;
use super::health::HealthMonitor;
use super::registry::TopicRegistry;
use super::stats::StatsRecorder;

/// Consumer hook for terminal failures (credential rejected, retries exhausted).
pub type FailureHandler = Arc<dyn Fn(&RealtimeError) + Send + Sync>;

/// Upper bound on a graceful transport close before it is abandoned.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Requests from the client façade.
pub(crate) enum Command {
    Connect {
        credential: Credential,
        reply: oneshot::Sender<Result<(), RealtimeError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Event produced by a transport task.
enum TransportEvent {
    Opened(Box<dyn FrameSink>),
    OpenFailed(TransportError),
    Frame(String),
    Closed(TransportError),
}

/// Transport event tagged with the generation of the transport it came from.
struct Inbound {
    generation: Generation,
    event: TransportEvent,
}

pub(crate) struct ConnectionManager {
    config: RealtimeConfig,
    policy: BackoffPolicy,
    connector: Arc<dyn Connector>,
    registry: TopicRegistry,
    state_tx: watch::Sender<ConnectionState>,
    stats: Arc<StatsRecorder>,
    failure_handler: Option<FailureHandler>,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,

    credential: Option<Credential>,
    generation: Generation,
    backoff: BackoffState,
    health: HealthMonitor,
    recent_ids: RecentMessageIds,
    sink: Option<Box<dyn FrameSink>>,
    transport_task: Option<JoinHandle<()>>,
    retry_at: Option<Instant>,
    handshake_deadline: Option<Instant>,
    /// Topic set last sent to the server on the current generation.
    announced_topics: Option<Vec<Topic>>,
    waiters: Vec<oneshot::Sender<Result<(), RealtimeError>>>,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        registry: TopicRegistry,
        state_tx: watch::Sender<ConnectionState>,
        stats: Arc<StatsRecorder>,
        failure_handler: Option<FailureHandler>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            policy: config.backoff_policy(),
            health: HealthMonitor::new(config.heartbeat_interval()),
            recent_ids: RecentMessageIds::new(config.dedup_window),
            config,
            connector,
            registry,
            state_tx,
            stats,
            failure_handler,
            commands,
            inbound_tx,
            inbound_rx,
            credential: None,
            generation: Generation::INITIAL,
            backoff: BackoffState::new(),
            sink: None,
            transport_task: None,
            retry_at: None,
            handshake_deadline: None,
            announced_topics: None,
            waiters: Vec::new(),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Runs until the client is closed, fails terminally, or is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            let retry_at = self.retry_at;
            let handshake_deadline = self.handshake_deadline;
            let stale_deadline = match self.state() {
                ConnectionState::Connected => self.health.deadline(),
                _ => None,
            };

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Connect { credential, reply }) => {
                        self.handle_connect(credential, reply).await;
                    }
                    Some(Command::Close { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                    }
                    None => {
                        tracing::debug!("Client dropped, shutting down connection");
                        self.shutdown().await;
                    }
                },

                Some(inbound) = self.inbound_rx.recv() => self.handle_inbound(inbound).await,

                _ = sleep_until_opt(retry_at) => {
                    self.retry_at = None;
                    self.dial().await;
                }

                _ = sleep_until_opt(handshake_deadline) => {
                    self.handshake_deadline = None;
                    let timeout = self.config.handshake_timeout();
                    self.handle_failure(TransportError::HandshakeTimeout(timeout).into()).await;
                }

                _ = sleep_until_opt(stale_deadline) => self.check_staleness().await,

                _ = self.registry.topics_changed() => self.announce_topics().await,
            }

            if self.state() == ConnectionState::Closed {
                return;
            }
        }
    }

    // ============================================
    // Commands
    // ============================================

    async fn handle_connect(
        &mut self,
        credential: Credential,
        reply: oneshot::Sender<Result<(), RealtimeError>>,
    ) {
        let same_credential = self
            .credential
            .as_ref()
            .is_some_and(|current| current.same_as(&credential));

        match self.state() {
            ConnectionState::Connected if same_credential => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting if same_credential => {
                self.waiters.push(reply);
            }
            ConnectionState::Reconnecting if same_credential => {
                // Dial now, keeping the attempt count.
                self.waiters.push(reply);
                self.retry_at = None;
                self.dial().await;
            }
            ConnectionState::Closed => {
                let _ = reply.send(Err(RealtimeError::ClientClosed));
            }
            state => {
                if state != ConnectionState::Disconnected {
                    tracing::info!(from = %state, "Credential replaced, starting fresh transport");
                }
                self.credential = Some(credential);
                self.waiters.push(reply);
                self.backoff.reset();
                self.stats.set_attempt(0);
                self.retry_at = None;
                self.dial().await;
            }
        }
    }

    /// Tears down everything and enters `Closed`. Idempotent.
    async fn shutdown(&mut self) {
        let disposed = self.registry.close();
        self.retry_at = None;
        self.handshake_deadline = None;
        self.teardown_transport().await;
        self.health.stop();
        self.transition(ConnectionState::Closed);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(RealtimeError::ClientClosed));
        }
        tracing::info!(generation = %self.generation, disposed, "Realtime client closed");
    }

    // ============================================
    // Transport lifecycle
    // ============================================

    /// Replaces any current transport with a new generation and starts dialing.
    async fn dial(&mut self) {
        if self.credential.is_none() {
            return;
        }
        self.teardown_transport().await;
        self.health.stop();

        self.generation = self.generation.next();
        self.registry.set_generation(self.generation);
        self.stats.set_generation(self.generation);
        self.announced_topics = None;
        self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout());
        self.transition(ConnectionState::Connecting);

        tracing::debug!(
            generation = %self.generation,
            attempt = self.backoff.attempt(),
            endpoint = %self.config.endpoint,
            "Dialing realtime endpoint"
        );

        self.transport_task = Some(tokio::spawn(run_transport(
            self.generation,
            self.connector.clone(),
            self.config.endpoint.clone(),
            self.inbound_tx.clone(),
        )));
    }

    /// Stops the current transport's reader and closes its sink.
    async fn teardown_transport(&mut self) {
        if let Some(task) = self.transport_task.take() {
            task.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
                tracing::debug!(generation = %self.generation, "Transport close timed out");
            }
        }
    }

    /// Handles a retryable failure: schedule a reconnect or give up.
    async fn handle_failure(&mut self, cause: RealtimeError) {
        let state = self.state();
        if !matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
            return;
        }
        if !cause.is_retryable() {
            match cause {
                RealtimeError::Protocol(e) => self.protocol_violation(e),
                other => tracing::warn!(code = other.code(), error = %other, "Ignoring non-retryable failure"),
            }
            return;
        }

        tracing::warn!(
            generation = %self.generation,
            state = %state,
            code = cause.code(),
            error = %cause,
            "Connection lost"
        );

        let last_alive = self.health.last_inbound().unwrap_or_else(Instant::now);
        self.teardown_transport().await;
        self.health.stop();
        self.handshake_deadline = None;
        self.backoff.mark_disconnected(last_alive, &self.policy);

        if self.backoff.is_exhausted(self.config.max_reconnect_attempts) {
            let exhausted = RealtimeError::ReconnectExhausted {
                attempts: self.backoff.attempt(),
                last_error: Box::new(cause),
            };
            self.fail_terminal(exhausted).await;
            return;
        }

        let delay = self.backoff.schedule(&self.policy, &mut rand::rng());
        self.stats.set_attempt(self.backoff.attempt());
        self.stats.reconnect_scheduled();
        self.retry_at = Some(Instant::now() + delay);
        self.transition(ConnectionState::Reconnecting);

        tracing::info!(
            generation = %self.generation,
            attempt = self.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    /// Ends the client on a non-retryable failure and notifies the consumer.
    async fn fail_terminal(&mut self, error: RealtimeError) {
        tracing::error!(
            generation = %self.generation,
            code = error.code(),
            error = %error,
            "Realtime connection failed permanently"
        );

        let waiters = std::mem::take(&mut self.waiters);
        self.shutdown().await;

        if let Some(handler) = &self.failure_handler {
            if catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err() {
                tracing::error!("Failure handler panicked");
            }
        }
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    async fn check_staleness(&mut self) {
        let Some(stale) = self.health.check(self.generation, Instant::now()) else {
            return;
        };
        self.handle_failure(stale).await;
    }

    // ============================================
    // Inbound frames
    // ============================================

    async fn handle_inbound(&mut self, inbound: Inbound) {
        if inbound.generation != self.generation || self.state() == ConnectionState::Closed {
            self.stats.stale_frame_discarded();
            tracing::debug!(
                frame_generation = %inbound.generation,
                current_generation = %self.generation,
                "Discarding event from superseded transport"
            );
            return;
        }

        match inbound.event {
            TransportEvent::Opened(sink) => {
                self.sink = Some(sink);
                let Some(credential) = self.credential.clone() else {
                    return;
                };
                let hello = ClientFrame::Connect {
                    credential: credential.expose().to_string(),
                };
                if let Err(e) = self.send(hello).await {
                    self.handle_failure(e).await;
                }
            }
            TransportEvent::OpenFailed(e) | TransportEvent::Closed(e) => {
                self.handle_failure(e.into()).await;
            }
            TransportEvent::Frame(text) => self.handle_frame(&text).await,
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        self.stats.frame_received();
        // Any inbound frame counts as proof of life, not only heartbeats.
        self.health.record_frame(self.generation, Instant::now());

        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.protocol_violation(e);
                return;
            }
        };

        let state = self.state();
        match (state, frame) {
            (ConnectionState::Connecting, ServerFrame::ConnectAck) => self.on_connected().await,
            (ConnectionState::Connecting, ServerFrame::ConnectReject { reason }) => {
                self.fail_terminal(RealtimeError::Auth { reason }).await;
            }
            (_, ServerFrame::Ping { ts }) => self.on_ping(ts).await,
            (ConnectionState::Connected, ServerFrame::Message { topic, payload, ts, message_id }) => {
                self.deliver(topic, payload, ts, message_id);
            }
            (_, ServerFrame::Shutdown { reason }) => self.on_server_shutdown(reason).await,
            (state, frame) => self.protocol_violation(ProtocolError::Unexpected {
                frame: frame.kind(),
                state: state.to_string(),
            }),
        }
    }

    async fn on_connected(&mut self) {
        let now = Instant::now();
        self.handshake_deadline = None;
        self.transition(ConnectionState::Connected);
        self.backoff.mark_connected(now);
        self.health.start(self.generation, now);

        tracing::info!(generation = %self.generation, "Realtime connection established");

        // Replay strictly before any further inbound frame is processed.
        self.announce_topics().await;
        if self.state() != ConnectionState::Connected {
            return;
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    async fn on_ping(&mut self, ts: Option<Value>) {
        let pong = self.health.on_ping(self.generation, ts, Instant::now());
        self.stats.heartbeat(self.health.last_heartbeat_at());
        if let Err(e) = self.send(pong).await {
            self.handle_failure(e).await;
        }
    }

    /// Server asked us to come back now: skip the backoff floor.
    async fn on_server_shutdown(&mut self, reason: String) {
        let state = self.state();
        if !matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
            tracing::debug!(state = %state, reason = %reason, "Ignoring shutdown frame, already reconnecting");
            return;
        }
        tracing::info!(generation = %self.generation, reason = %reason, "Server requested reconnect");
        self.teardown_transport().await;
        self.health.stop();
        self.handshake_deadline = None;
        self.backoff.reset();
        self.stats.set_attempt(0);
        self.retry_at = Some(Instant::now());
        self.transition(ConnectionState::Reconnecting);
    }

    fn deliver(&mut self, topic: String, payload: Value, ts: Option<Value>, message_id: Option<String>) {
        let topic = match Topic::new(topic) {
            Ok(topic) => topic,
            Err(e) => {
                self.protocol_violation(ProtocolError::Malformed(e.to_string()));
                return;
            }
        };

        if let Some(id) = message_id.as_deref() {
            if !self.recent_ids.insert(id) {
                self.stats.duplicate_dropped();
                tracing::debug!(topic = %topic, message_id = id, "Dropping duplicate message");
                return;
            }
        }

        let message = Message::new(topic, payload, self.generation)
            .with_server_timestamp(ts)
            .with_message_id(message_id);
        let delivered = self.registry.dispatch(&message);
        self.stats.dispatched(delivered);
        tracing::trace!(topic = %message.topic, delivered, "Dispatched message");
    }

    fn protocol_violation(&self, error: ProtocolError) {
        self.stats.protocol_error();
        tracing::warn!(generation = %self.generation, error = %error, "Discarding frame");
    }

    // ============================================
    // Outbound frames
    // ============================================

    /// Sends the live topic set if it differs from what the server last saw.
    ///
    /// The first call on a generation always sends, even for an empty set.
    async fn announce_topics(&mut self) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        let topics = self.registry.topics();
        if self.announced_topics.as_ref() == Some(&topics) {
            return;
        }

        let count = topics.len();
        match self.send(ClientFrame::Subscribe { topics: topics.clone() }).await {
            Ok(()) => {
                self.announced_topics = Some(topics);
                tracing::debug!(generation = %self.generation, topics = count, "Topic set announced");
            }
            Err(e) => self.handle_failure(e).await,
        }
    }

    async fn send(&mut self, frame: ClientFrame) -> Result<(), RealtimeError> {
        let text = frame.encode()?;
        let sink = self.sink.as_mut().ok_or(TransportError::Closed)?;
        sink.send_text(text).await?;
        tracing::trace!(generation = %self.generation, frame = frame.kind(), "Frame sent");
        Ok(())
    }

    fn transition(&mut self, target: ConnectionState) {
        let current = self.state();
        if current == target {
            return;
        }
        match current.transition_to(target) {
            Ok(next) => {
                tracing::debug!(from = %current, to = %next, generation = %self.generation, "Connection state changed");
                self.state_tx.send_replace(next);
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring invalid state transition"),
        }
    }
}

/// Dials one transport and forwards everything it produces, tagged with `generation`.
async fn run_transport(
    generation: Generation,
    connector: Arc<dyn Connector>,
    endpoint: String,
    events: mpsc::UnboundedSender<Inbound>,
) {
    let emit = |event| events.send(Inbound { generation, event }).is_ok();

    let TransportHalves { sink, mut stream } = match connector.open(&endpoint).await {
        Ok(halves) => halves,
        Err(e) => {
            emit(TransportEvent::OpenFailed(e));
            return;
        }
    };
    if !emit(TransportEvent::Opened(sink)) {
        return;
    }

    loop {
        let event = match stream.next_text().await {
            Some(Ok(text)) => TransportEvent::Frame(text),
            Some(Err(e)) => {
                emit(TransportEvent::Closed(e));
                return;
            }
            None => {
                emit(TransportEvent::Closed(TransportError::Closed));
                return;
            }
        };
        if !emit(event) {
            return;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
