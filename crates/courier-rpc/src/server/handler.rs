//! Per-request handler surface of the RPC server.

use crate::domain::envelope::{encode_raw_reply, CodecError, ErrorBody, ErrorCode, ReplyEnvelope};
use crate::domain::request_id::RequestId;
use async_trait::async_trait;
use serde_json::Value;
use shared_broker::{BrokerConnection, BrokerError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Message put on the wire for faults that were not explicitly described.
pub const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

/// Reply failures
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("request {id} was already replied to")]
    AlreadyReplied { id: RequestId },
    #[error("reply encoding failed: {0}")]
    Codec(#[from] CodecError),
    #[error("reply publish failed: {0}")]
    Broker(#[from] BrokerError),
}

struct ReplierInner {
    id: RequestId,
    reply_channel: String,
    publisher: Arc<dyn BrokerConnection>,
    replied: AtomicBool,
}

/// Publishes the ack and the single terminal reply for one request.
///
/// The first terminal reply wins; any later attempt fails with
/// [`ReplyError::AlreadyReplied`] and nothing reaches the wire.
#[derive(Clone)]
pub struct Replier {
    inner: Arc<ReplierInner>,
}

impl Replier {
    pub fn new(
        id: RequestId,
        reply_channel: impl Into<String>,
        publisher: Arc<dyn BrokerConnection>,
    ) -> Self {
        Self {
            inner: Arc::new(ReplierInner {
                id,
                reply_channel: reply_channel.into(),
                publisher,
                replied: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.inner.id
    }

    pub fn reply_channel(&self) -> &str {
        &self.inner.reply_channel
    }

    /// Whether a terminal reply has been claimed.
    pub fn has_replied(&self) -> bool {
        self.inner.replied.load(Ordering::SeqCst)
    }

    /// Publish `{ id, ...message }`. `message` must be a JSON object.
    pub async fn reply(&self, message: Value) -> Result<(), ReplyError> {
        let encoded = encode_raw_reply(&self.inner.id, message)?;
        self.publish_terminal(encoded).await
    }

    /// Publish `{ id, result }`.
    pub async fn reply_with_result(&self, result: Value) -> Result<(), ReplyError> {
        let encoded = ReplyEnvelope::result(self.inner.id.clone(), result).encode()?;
        self.publish_terminal(encoded).await
    }

    /// Publish an explicit error. `code` defaults to the sentinel.
    pub async fn reply_with_error(
        &self,
        message: impl Into<String>,
        code: Option<ErrorCode>,
        data: Option<Value>,
    ) -> Result<(), ReplyError> {
        let body = ErrorBody::new(message, code, data);
        let encoded = ReplyEnvelope::error(self.inner.id.clone(), body).encode()?;
        self.publish_terminal(encoded).await
    }

    /// Publish a generic internal error for a fault. The fault text never
    /// reaches the wire.
    pub async fn reply_with_fault(&self, fault: &anyhow::Error) -> Result<(), ReplyError> {
        debug!(id = %self.inner.id, fault = %fault, "Replying to fault with generic error");
        self.reply_with_error(INTERNAL_SERVER_ERROR, None, None).await
    }

    /// Publish the ack envelope.
    pub(crate) async fn ack(&self) -> Result<(), ReplyError> {
        let encoded = ReplyEnvelope::ack(self.inner.id.clone()).encode()?;
        debug!(
            id = %self.inner.id,
            channel = %self.inner.reply_channel,
            "ACK -->"
        );
        self.inner
            .publisher
            .publish(&self.inner.reply_channel, &encoded)
            .await?;
        Ok(())
    }

    async fn publish_terminal(&self, encoded: String) -> Result<(), ReplyError> {
        if self
            .inner
            .replied
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ReplyError::AlreadyReplied {
                id: self.inner.id.clone(),
            });
        }

        debug!(channel = %self.inner.reply_channel, reply = %encoded, "RES -->");

        if let Err(e) = self
            .inner
            .publisher
            .publish(&self.inner.reply_channel, &encoded)
            .await
        {
            error!(id = %self.inner.id, error = %e, "Reply publish failed, reply lost");
            return Err(e.into());
        }
        Ok(())
    }
}

/// One dequeued call, as handed to a [`RequestHandler`].
pub struct IncomingCall {
    pub method: String,
    pub params: Value,
    pub replier: Replier,
}

/// Server-side request handler.
///
/// Returning `Err` (or panicking) is answered with a generic internal error
/// unless the handler already replied.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, call: IncomingCall) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`RequestHandler`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap a closure `|call| async move { ... }` as a [`RequestHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(IncomingCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> RequestHandler for HandlerFn<F>
where
    F: Fn(IncomingCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, call: IncomingCall) -> anyhow::Result<()> {
        (self.f)(call).await
    }
}
