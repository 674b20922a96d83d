//! Opaque authentication credential.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;

/// Token supplied by the authentication subsystem.
///
/// The client never inspects its structure; it is only written into the
/// handshake frame. `Debug` output is redacted.
#[derive(Clone)]
pub struct Credential(Arc<SecretString>);

impl Credential {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::new(token.into())))
    }

    /// Returns the raw token for the handshake frame.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Returns true if both credentials carry the same token.
    pub fn same_as(&self, other: &Credential) -> bool {
        self.expose() == other.expose()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}
