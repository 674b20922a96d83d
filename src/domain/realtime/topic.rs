//! Validated topic names.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use super::SubscriptionError;

/// Named channel a consumer subscribes to.
///
/// The only constraint is that the name is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Validates and wraps a topic name.
    pub fn new(name: impl Into<String>) -> Result<Self, SubscriptionError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SubscriptionError::EmptyTopic);
        }
        Ok(Self(name))
    }

    /// Returns the topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
