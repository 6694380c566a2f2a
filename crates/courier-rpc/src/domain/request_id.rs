//! Request ID for reply correlation.
//!
//! Generated from UUID v7 in its hyphen-less form: short, unique among the
//! requests one client has pending, and time-ordered for log correlation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier correlating a request with its ack and its reply.
///
/// Decoding accepts any string, since ids minted by foreign clients only
/// need to round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new request ID
    pub fn new() -> Self {
        Self(generate_token())
    }

    /// Wrap an existing token
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fresh unique token, also used for reply channel names.
pub fn generate_token() -> String {
    Uuid::now_v7().simple().to_string()
}
