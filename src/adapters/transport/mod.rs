//! Transport adapters that need no network.

mod in_memory;

pub use in_memory::{InMemoryConnector, ServerConnection, ServerEndpoint};
