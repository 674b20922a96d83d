//! Domain layer containing the realtime client vocabulary.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (ids, timestamps, state machine trait, errors)
//! - `realtime` - Connection states, backoff, topics, messages and the error taxonomy

pub mod foundation;
pub mod realtime;
