//! Recruit Realtime - live topic subscriptions for the recruiting dashboard
//!
//! This crate keeps one logical connection to the dashboard's realtime server
//! alive across network failures, and fans server messages out to local
//! per-topic subscribers.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;

pub use application::{ConnectionStats, RealtimeClient, SubscriptionHandle};
pub use domain::realtime::{ConnectionState, Credential, Message, RealtimeError, Topic};
