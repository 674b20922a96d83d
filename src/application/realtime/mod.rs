//! Realtime subscription client.
//!
//! [`RealtimeClient`] is the only entry point. It owns a [`TopicRegistry`]
//! shared with its connection task, which runs the connection state
//! machine, backoff, heartbeat monitoring and topic replay.

mod client;
mod dedup;
mod health;
mod manager;
mod registry;
mod stats;

pub use client::RealtimeClient;
pub use dedup::RecentMessageIds;
pub use health::HealthMonitor;
pub use manager::FailureHandler;
pub use registry::{Callback, SubscriptionHandle, TopicRegistry};
pub use stats::{ConnectionStats, StatsRecorder};
