//! Request/response context handed to dispatch stages.

use crate::domain::envelope::ErrorCode;
use crate::domain::request_id::RequestId;
use crate::server::{Replier, ReplyError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Application facts visible to every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub identifier: String,
    pub reveal_error_messages: bool,
}

struct RequestInner {
    app: AppInfo,
    method: String,
    params: Value,
    replier: Replier,
}

/// The inbound call. Cheap to clone.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    pub fn new(app: AppInfo, method: impl Into<String>, params: Value, replier: Replier) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                app,
                method: method.into(),
                params,
                replier,
            }),
        }
    }

    pub fn app(&self) -> &AppInfo {
        &self.inner.app
    }

    pub fn id(&self) -> &RequestId {
        self.inner.replier.id()
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn params(&self) -> &Value {
        &self.inner.params
    }

    /// Deserialize the params into a typed value.
    pub fn params_as<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(T::deserialize(&self.inner.params)?)
    }

    /// Whether the request has been answered.
    pub fn is_stopped(&self) -> bool {
        self.inner.replier.has_replied()
    }
}

/// The reply side of a call.
///
/// `Pending → Replied`: the first [`send`](Self::send) or
/// [`error`](Self::error) wins, every later one is rejected with
/// [`ReplyError::AlreadyReplied`].
#[derive(Clone)]
pub struct Response {
    replier: Replier,
}

impl Response {
    pub fn new(replier: Replier) -> Self {
        Self { replier }
    }

    /// Terminal success.
    pub async fn send(&self, result: impl Serialize) -> Result<(), ReplyError> {
        let value = serde_json::to_value(result)
            .map_err(|e| ReplyError::Codec(e.into()))?;
        self.replier.reply_with_result(value).await
    }

    /// Terminal failure. `code` defaults to the sentinel; absent `data` is
    /// omitted from the wire.
    pub async fn error(
        &self,
        message: impl Into<String>,
        code: Option<ErrorCode>,
        data: Option<Value>,
    ) -> Result<(), ReplyError> {
        self.replier.reply_with_error(message, code, data).await
    }

    /// Whether `send` or `error` has been called.
    pub fn is_stopped(&self) -> bool {
        self.replier.has_replied()
    }
}
