//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, timestamps, the state machine trait and the
//! validation error used by the realtime domain.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::ValidationError;
pub use ids::{Generation, SubscriptionId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
