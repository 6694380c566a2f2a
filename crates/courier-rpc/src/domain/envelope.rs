//! Wire envelopes exchanged over the broker.
//!
//! ```text
//! Request : { "id", "method", "params", "meta": { "replyChannel" } }
//! Ack     : { "id", "status": "ack" }
//! Result  : { "id", "result" }
//! Error   : { "id", "error": { "code", "message", "data"? } }
//! ```
//!
//! Replies carry no explicit discriminant: a reply is a result when it has a
//! non-null `result` key and an error when it has an `error` key. A result
//! that encodes to JSON `null` is indistinguishable from "no result" and is
//! rejected on decode as [`CodecError::UnrecognizedReply`].

use crate::domain::request_id::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Error code used when the replier does not name one.
pub const DEFAULT_ERROR_CODE: i64 = -32000;

/// Status value of an ack envelope.
const ACK_STATUS: &str = "ack";

/// Envelope decode/encode failures. Always local to one message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("reply {id} has neither status, result nor error")]
    UnrecognizedReply { id: RequestId },

    #[error("reply payload must be a JSON object")]
    NotAnObject,
}

/// Remote error code. Numeric or textual on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl Default for ErrorCode {
    fn default() -> Self {
        Self::Number(DEFAULT_ERROR_CODE)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(code) => write!(f, "{}", code),
            Self::Text(code) => f.write_str(code),
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        Self::Number(code)
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        Self::Text(code.to_string())
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        Self::Text(code)
    }
}

/// `meta` block of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(rename = "replyChannel")]
    pub reply_channel: String,
}

/// A method call pushed onto an identifier's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub meta: RequestMeta,
}

impl RequestEnvelope {
    pub fn new(
        id: RequestId,
        method: impl Into<String>,
        params: Value,
        reply_channel: impl Into<String>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            meta: RequestMeta {
                reply_channel: reply_channel.into(),
            },
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a dequeued payload. A missing `meta.replyChannel` is an error.
    pub fn decode(encoded: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(encoded)?)
    }
}

/// Body of an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>, code: Option<ErrorCode>, data: Option<Value>) -> Self {
        Self {
            code: code.unwrap_or_default(),
            message: message.into(),
            data,
        }
    }
}

/// What a reply envelope says about its request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A server claimed the request and started processing it.
    Ack,
    /// Terminal success.
    Result(Value),
    /// Terminal failure.
    Error(ErrorBody),
}

impl Reply {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ack)
    }
}

/// An ack, result or error published on a reply channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    pub id: RequestId,
    pub reply: Reply,
}

/// Flat wire shape shared by all three reply kinds.
#[derive(Serialize, Deserialize)]
struct WireReply {
    id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl ReplyEnvelope {
    pub fn ack(id: RequestId) -> Self {
        Self {
            id,
            reply: Reply::Ack,
        }
    }

    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            id,
            reply: Reply::Result(result),
        }
    }

    pub fn error(id: RequestId, error: ErrorBody) -> Self {
        Self {
            id,
            reply: Reply::Error(error),
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        let (status, result, error) = match &self.reply {
            Reply::Ack => (Some(ACK_STATUS.to_string()), None, None),
            Reply::Result(value) => (None, Some(value.clone()), None),
            Reply::Error(body) => (None, None, Some(body.clone())),
        };
        let wire = WireReply {
            id: self.id.clone(),
            status,
            result,
            error,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    pub fn decode(encoded: &str) -> Result<Self, CodecError> {
        let wire: WireReply = serde_json::from_str(encoded)?;

        let reply = if wire.status.as_deref() == Some(ACK_STATUS) {
            Reply::Ack
        } else if let Some(result) = wire.result {
            Reply::Result(result)
        } else if let Some(error) = wire.error {
            Reply::Error(error)
        } else {
            return Err(CodecError::UnrecognizedReply { id: wire.id });
        };

        Ok(Self { id: wire.id, reply })
    }
}

/// Encode a free-form reply object as `{ id, ...message }`.
///
/// The `id` key always wins over one supplied in `message`.
pub fn encode_raw_reply(id: &RequestId, message: Value) -> Result<String, CodecError> {
    let Value::Object(fields) = message else {
        return Err(CodecError::NotAnObject);
    };

    let mut object = Map::with_capacity(fields.len() + 1);
    object.insert("id".to_string(), Value::String(id.as_str().to_string()));
    for (key, value) in fields {
        if key != "id" {
            object.insert(key, value);
        }
    }
    Ok(serde_json::to_string(&Value::Object(object))?)
}
