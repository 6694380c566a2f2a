//! Client-facing error taxonomy.
//!
//! Every failed [`request`](crate::RpcClient::request) ends in exactly one
//! [`RequestError`]. Its `kind` tells the caller what is known about the
//! remote side:
//!
//! | Kind | Remote state |
//! |------|--------------|
//! | `AckTimeout` | Never claimed; the request was pulled back off the queue |
//! | `ResponseTimeout` | Claimed, outcome unknown (may still run) |
//! | `Remote` | Handler ran and reported an error |
//! | `Local` | Client-side fault (broker, codec, closed client) |

use crate::domain::config::EffectiveOptions;
use crate::domain::envelope::{ErrorBody, ErrorCode};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Message of an [`RequestErrorKind::AckTimeout`] error.
pub const ACK_TIMEOUT_MESSAGE: &str =
    "Timed out waiting for consumer to acknowledge receipt of the request";

/// Message of an [`RequestErrorKind::ResponseTimeout`] error.
pub const RESPONSE_TIMEOUT_MESSAGE: &str = "Timed out waiting for response";

/// Which phase of the call failed, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    AckTimeout,
    ResponseTimeout,
    Remote,
    Local,
}

impl fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AckTimeout => "AckTimeoutError",
            Self::ResponseTimeout => "ResponseTimeoutError",
            Self::Remote | Self::Local => "RequestError",
        };
        f.write_str(name)
    }
}

/// The call a [`RequestError`] belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// Target identifier.
    pub identifier: String,
    /// The encoded request envelope as pushed.
    pub encoded: String,
    /// Timeouts in effect for the call.
    pub options: EffectiveOptions,
}

/// Failure of one RPC call.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RequestError {
    pub kind: RequestErrorKind,
    pub message: String,
    /// Remote error code (`Remote` only).
    pub code: Option<ErrorCode>,
    /// Remote error data (`Remote` only).
    pub data: Option<Value>,
    pub request: RequestDescriptor,
}

impl RequestError {
    pub fn ack_timeout(request: RequestDescriptor) -> Self {
        Self {
            kind: RequestErrorKind::AckTimeout,
            message: ACK_TIMEOUT_MESSAGE.to_string(),
            code: None,
            data: None,
            request,
        }
    }

    pub fn response_timeout(request: RequestDescriptor) -> Self {
        Self {
            kind: RequestErrorKind::ResponseTimeout,
            message: RESPONSE_TIMEOUT_MESSAGE.to_string(),
            code: None,
            data: None,
            request,
        }
    }

    /// Error reported by the remote handler.
    pub fn remote(body: ErrorBody, request: RequestDescriptor) -> Self {
        Self {
            kind: RequestErrorKind::Remote,
            message: body.message,
            code: Some(body.code),
            data: body.data,
            request,
        }
    }

    /// Any unexpected local fault during the call.
    pub fn local(cause: impl fmt::Display, request: RequestDescriptor) -> Self {
        Self {
            kind: RequestErrorKind::Local,
            message: cause.to_string(),
            code: None,
            data: None,
            request,
        }
    }

    pub fn is_ack_timeout(&self) -> bool {
        self.kind == RequestErrorKind::AckTimeout
    }

    pub fn is_response_timeout(&self) -> bool {
        self.kind == RequestErrorKind::ResponseTimeout
    }

    pub fn is_remote(&self) -> bool {
        self.kind == RequestErrorKind::Remote
    }
}

/// Treat "nobody claimed it" as a non-event.
///
/// For fire-and-forget calls: an ack timeout becomes `Ok(None)`, a result
/// becomes `Ok(Some(result))`, and every other error passes through.
pub fn quiet_ack_timeout(result: Result<Value, RequestError>) -> Result<Option<Value>, RequestError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_ack_timeout() => Ok(None),
        Err(err) => Err(err),
    }
}
