//! RPC client.
//!
//! ```text
//! request() ──→ register pending ──→ push to <prefix>.rpc.<identifier>
//!                    │
//!      ack wait ◄────┤◄──── reply listener ◄──── <prefix>.reply.<token>
//!   response wait ◄──┘
//! ```
//!
//! One client owns one reply channel for its whole lifetime. A single
//! subscription demultiplexes every ack and reply by request id.

pub mod pending;

pub use pending::{PendingGuard, PendingRequestStore, PendingStats, PendingWaiters, TerminalReply};

use crate::domain::config::{queue_name, reply_channel_name, ClientConfig, ConfigError, RequestOptions};
use crate::domain::envelope::{ReplyEnvelope, RequestEnvelope};
use crate::domain::error::{RequestDescriptor, RequestError};
use crate::domain::request_id::{generate_token, RequestId};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use shared_broker::{Broker, BrokerConnection, BrokerError, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Client setup and teardown errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

struct ClientInner {
    config: ClientConfig,
    reply_channel: String,
    /// Pushes and queue removals.
    publisher: Arc<dyn BrokerConnection>,
    /// Reply channel subscription only.
    subscriber: Arc<dyn BrokerConnection>,
    pending: Arc<PendingRequestStore>,
    closed: AtomicBool,
}

/// Issues calls to RPC servers and waits for their replies.
pub struct RpcClient {
    inner: Arc<ClientInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Connect with default configuration.
    pub async fn connect(broker: &dyn Broker) -> Result<Self, ClientError> {
        Self::connect_with_config(broker, ClientConfig::default()).await
    }

    /// Open both connections and start listening on a fresh reply channel.
    pub async fn connect_with_config(
        broker: &dyn Broker,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let publisher = broker.connect().await?;
        let subscriber = broker.connect().await?;
        let reply_channel = reply_channel_name(&config.prefix, &generate_token());

        // Subscribed before connect returns, so no reply can be missed.
        let subscription = subscriber.subscribe(&reply_channel).await?;

        let pending = Arc::new(PendingRequestStore::new());
        let listener = tokio::spawn(listen(subscription, pending.clone()));

        info!(reply_channel = %reply_channel, "RPC client connected");

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                reply_channel,
                publisher,
                subscriber,
                pending,
                closed: AtomicBool::new(false),
            }),
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn reply_channel(&self) -> &str {
        &self.inner.reply_channel
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Calls still waiting for an ack or reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.pending_count()
    }

    pub fn stats(&self) -> &PendingStats {
        self.inner.pending.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Call `method` on `identifier` with the client's default timeouts.
    pub async fn request(
        &self,
        identifier: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<Value, RequestError> {
        self.request_with(identifier, method, params, RequestOptions::default())
            .await
    }

    /// Call `method` on `identifier`.
    ///
    /// Resolves with the remote result, or fails with exactly one
    /// [`RequestError`]. Never waits past `options.timeout` (plus the time
    /// needed to pull an unclaimed request back off the queue).
    pub async fn request_with(
        &self,
        identifier: &str,
        method: &str,
        params: impl Serialize,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        let effective = options.resolve(&self.inner.config);
        let mut descriptor = RequestDescriptor {
            identifier: identifier.to_string(),
            encoded: String::new(),
            options: effective,
        };

        if let Err(e) = effective.validate() {
            return Err(RequestError::local(e, descriptor));
        }
        if self.is_closed() {
            return Err(RequestError::local("client is closed", descriptor));
        }

        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => return Err(RequestError::local(e, descriptor)),
        };

        let id = RequestId::new();
        let envelope = RequestEnvelope::new(id.clone(), method, params, self.inner.reply_channel.clone());
        descriptor.encoded = match envelope.encode() {
            Ok(encoded) => encoded,
            Err(e) => return Err(RequestError::local(e, descriptor)),
        };

        let queue = queue_name(&self.inner.config.prefix, identifier);
        let pending = &self.inner.pending;

        // Registered before the push: an ack may arrive before push returns.
        let waiters = pending.register(id.clone(), method);
        let _guard = pending.guard(id.clone());

        debug!(id = %id, queue = %queue, request = %descriptor.encoded, "REQ -->");

        if let Err(e) = self.inner.publisher.push(&queue, &descriptor.encoded).await {
            return Err(RequestError::local(e, descriptor));
        }

        // Phase 1: ack
        match timeout(effective.ack_timeout, waiters.ack).await {
            Ok(Ok(())) => debug!(id = %id, "ACK <--"),
            Ok(Err(_)) => {
                return Err(RequestError::local("reply listener stopped", descriptor));
            }
            Err(_) => {
                let removed = match self
                    .inner
                    .publisher
                    .remove(&queue, &descriptor.encoded)
                    .await
                {
                    Ok(removed) => removed,
                    Err(e) => return Err(RequestError::local(e, descriptor)),
                };

                if removed > 0 {
                    debug!(id = %id, queue = %queue, "Ack timeout, request withdrawn");
                    return Err(RequestError::ack_timeout(descriptor));
                }
                // Already claimed by a server: it will still reply.
                debug!(id = %id, "Ack timeout but request was claimed");
            }
        }

        // Phase 2: response
        match timeout(effective.response_budget(), waiters.response).await {
            Ok(Ok(Ok(result))) => {
                debug!(id = %id, "RES <--");
                Ok(result)
            }
            Ok(Ok(Err(body))) => Err(RequestError::remote(body, descriptor)),
            Ok(Err(_)) => Err(RequestError::local("reply listener stopped", descriptor)),
            Err(_) => {
                debug!(id = %id, "Response timeout");
                Err(RequestError::response_timeout(descriptor))
            }
        }
    }

    /// Release both broker connections.
    ///
    /// Calls still in progress are abandoned and end with a timeout. Calling
    /// it again is a no-op.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(
            reply_channel = %self.inner.reply_channel,
            pending = self.pending_count(),
            "RPC client closing"
        );

        self.inner.subscriber.quit().await?;
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            if let Err(e) = handle.await {
                warn!(error = %e, "Reply listener ended abnormally");
            }
        }
        self.inner.publisher.quit().await?;
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

/// Route every envelope on the reply channel to its pending request.
async fn listen(mut subscription: Subscription, pending: Arc<PendingRequestStore>) {
    while let Some(message) = subscription.recv().await {
        match ReplyEnvelope::decode(&message) {
            Ok(envelope) => {
                pending.deliver(envelope);
            }
            Err(e) => warn!(
                channel = %subscription.channel(),
                error = %e,
                "Dropping undecodable reply"
            ),
        }
    }
    debug!(channel = %subscription.channel(), "Reply listener stopped");
}
