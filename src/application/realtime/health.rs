//! Heartbeat-based liveness tracking for one transport generation.
//!
//! The server pings every `interval`. Any inbound frame, heartbeat or data,
//! counts as proof of life. A connection that delivers nothing for
//! `2 × interval` is stale even if the transport still reports itself open.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::foundation::{Generation, Timestamp};
use crate::domain::realtime::{ClientFrame, RealtimeError};

/// Liveness monitor. Inert until [`HealthMonitor::start`] is called.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    interval: Duration,
    generation: Generation,
    last_inbound: Option<Instant>,
    heartbeats: u64,
    last_heartbeat_at: Option<Timestamp>,
}

impl HealthMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            generation: Generation::INITIAL,
            last_inbound: None,
            heartbeats: 0,
            last_heartbeat_at: None,
        }
    }

    /// Expected heartbeat cadence.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Silence after which the connection is declared stale.
    pub fn stale_after(&self) -> Duration {
        self.interval.saturating_mul(2)
    }

    /// Begins watching `generation`, discarding anything tracked before.
    pub fn start(&mut self, generation: Generation, now: Instant) {
        self.generation = generation;
        self.last_inbound = Some(now);
    }

    /// Stops watching. No deadline until the next `start`.
    pub fn stop(&mut self) {
        self.last_inbound = None;
    }

    /// Generation currently watched, if any.
    pub fn watching(&self) -> Option<Generation> {
        self.last_inbound.map(|_| self.generation)
    }

    /// Records an inbound frame. Frames from other generations are ignored.
    pub fn record_frame(&mut self, generation: Generation, now: Instant) {
        if self.watching() == Some(generation) {
            self.last_inbound = Some(now);
        }
    }

    /// Records a server heartbeat and returns the reciprocal `pong`.
    pub fn on_ping(&mut self, generation: Generation, ts: Option<Value>, now: Instant) -> ClientFrame {
        self.record_frame(generation, now);
        self.heartbeats += 1;
        self.last_heartbeat_at = Some(Timestamp::now());
        ClientFrame::Pong { ts }
    }

    /// Last time the watched generation showed it was alive.
    pub fn last_inbound(&self) -> Option<Instant> {
        self.last_inbound
    }

    /// When the watched generation goes stale if nothing else arrives.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_inbound.map(|last| last + self.stale_after())
    }

    /// Returns the staleness error if `generation` is watched and has been
    /// silent for at least `2 × interval` at `now`.
    pub fn check(&self, generation: Generation, now: Instant) -> Option<RealtimeError> {
        if self.watching() != Some(generation) {
            return None;
        }
        let last = self.last_inbound?;
        let silent_for = now.saturating_duration_since(last);
        (silent_for >= self.stale_after()).then_some(RealtimeError::StaleConnection {
            generation,
            silent_for,
        })
    }

    /// Heartbeats answered since creation.
    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    /// Wall-clock time of the most recent heartbeat.
    pub fn last_heartbeat_at(&self) -> Option<Timestamp> {
        self.last_heartbeat_at
    }
}
