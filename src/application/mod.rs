//! Application layer - orchestrates the domain over the transport port.

pub mod realtime;

pub use realtime::{ConnectionStats, RealtimeClient, SubscriptionHandle};
