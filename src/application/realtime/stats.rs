//! Connection statistics shared between the manager task and the client.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::domain::foundation::{Generation, Timestamp};

/// Point-in-time view of a client's connection counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub generation: u64,
    /// Current backoff attempt counter.
    pub reconnect_attempt: u32,
    /// Reconnects scheduled over the client's lifetime.
    pub reconnects: u64,
    pub frames_received: u64,
    pub messages_dispatched: u64,
    pub stale_frames_discarded: u64,
    pub protocol_errors: u64,
    pub duplicates_dropped: u64,
    pub heartbeats: u64,
    pub last_heartbeat_at: Option<Timestamp>,
}

/// Lock-free counters written by the manager, read by any thread.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    generation: AtomicU64,
    reconnect_attempt: AtomicU64,
    reconnects: AtomicU64,
    frames_received: AtomicU64,
    messages_dispatched: AtomicU64,
    stale_frames_discarded: AtomicU64,
    protocol_errors: AtomicU64,
    duplicates_dropped: AtomicU64,
    heartbeats: AtomicU64,
    last_heartbeat_at: Mutex<Option<Timestamp>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_generation(&self, generation: Generation) {
        self.generation.store(generation.as_u64(), Ordering::Relaxed);
    }

    pub fn set_attempt(&self, attempt: u32) {
        self.reconnect_attempt.store(u64::from(attempt), Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatched(&self, deliveries: usize) {
        self.messages_dispatched
            .fetch_add(deliveries as u64, Ordering::Relaxed);
    }

    pub fn stale_frame_discarded(&self) {
        self.stale_frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat(&self, at: Option<Timestamp>) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        *self
            .last_heartbeat_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            generation: self.generation.load(Ordering::Relaxed),
            reconnect_attempt: u32::try_from(self.reconnect_attempt.load(Ordering::Relaxed))
                .unwrap_or(u32::MAX),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            stale_frames_discarded: self.stale_frames_discarded.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            last_heartbeat_at: *self
                .last_heartbeat_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}
