//! RPC server: consumes one identifier's request queue.
//!
//! ```text
//! pop_blocking ──→ decode ──→ track in-flight ──→ spawn ─┐
//!      ↑                                                 │
//!      └──────────────── next dequeue ←──────────────────┘
//!
//! spawned task: ACK --> ──→ handler ──→ RES --> ──→ release in-flight
//! ```
//!
//! Dequeuing is sequential and FIFO; handling of distinct requests runs
//! concurrently, so replies may go out in any order. Replies are published on
//! a dedicated connection so shutdown can end the dequeue connection while
//! in-flight requests are still replying.

pub mod handler;
pub mod in_flight;

pub use handler::{handler_fn, HandlerFn, IncomingCall, Replier, ReplyError, RequestHandler};
pub use in_flight::{InFlightGuard, InFlightSet};

use crate::domain::config::{queue_name, ConfigError, ServerConfig};
use crate::domain::envelope::RequestEnvelope;
use crate::panic_message;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use shared_broker::{Broker, BrokerConnection, BrokerError};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a broker fault before dequeuing again.
const DEQUEUE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Server errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("shutdown task failed: {0}")]
    Shutdown(String),
}

type ShutdownFuture = Shared<BoxFuture<'static, Result<(), ServerError>>>;

struct ServerInner {
    identifier: String,
    queue: String,
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
    /// Blocking dequeues only.
    subscriber: Arc<dyn BrokerConnection>,
    /// Acks and replies.
    publisher: Arc<dyn BrokerConnection>,
    in_flight: InFlightSet,
    closing: AtomicBool,
    dequeue_loop: Mutex<Option<JoinHandle<()>>>,
}

/// A running RPC server for one identifier.
pub struct RpcServer {
    inner: Arc<ServerInner>,
    shutdown: Mutex<Option<ShutdownFuture>>,
}

impl RpcServer {
    /// Start consuming `identifier`'s queue with default configuration.
    pub async fn start(
        broker: &dyn Broker,
        identifier: &str,
        handler: impl RequestHandler,
    ) -> Result<Self, ServerError> {
        Self::start_with_config(broker, identifier, Arc::new(handler), ServerConfig::default()).await
    }

    /// Start consuming `identifier`'s queue.
    pub async fn start_with_config(
        broker: &dyn Broker,
        identifier: &str,
        handler: Arc<dyn RequestHandler>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let subscriber = broker.connect().await?;
        let publisher = broker.connect().await?;

        let inner = Arc::new(ServerInner {
            identifier: identifier.to_string(),
            queue: queue_name(&config.prefix, identifier),
            config,
            handler,
            subscriber,
            publisher,
            in_flight: InFlightSet::new(),
            closing: AtomicBool::new(false),
            dequeue_loop: Mutex::new(None),
        });

        let handle = tokio::spawn(inner.clone().run());
        *inner.dequeue_loop.lock() = Some(handle);

        info!(
            identifier = %inner.identifier,
            queue = %inner.queue,
            "RPC server started"
        );

        Ok(Self {
            inner,
            shutdown: Mutex::new(None),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.queue
    }

    /// Acknowledged requests still waiting for their reply.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Gracefully shut down.
    ///
    /// Stops dequeuing, waits for every in-flight request to reply, then
    /// closes the reply connection. Calling it again (or concurrently)
    /// awaits the same shutdown.
    pub async fn close(&self) -> Result<(), ServerError> {
        let shutdown = {
            let mut guard = self.shutdown.lock();
            guard
                .get_or_insert_with(|| {
                    let inner = self.inner.clone();
                    let task = tokio::spawn(async move { inner.shutdown().await });
                    async move {
                        task.await
                            .unwrap_or_else(|e| Err(ServerError::Shutdown(e.to_string())))
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        shutdown.await
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        if self.is_closing() {
            return;
        }
        // Dropped without close(): stop dequeuing, let in-flight tasks finish.
        self.inner.closing.store(true, Ordering::SeqCst);
        if let Some(handle) = self.inner.dequeue_loop.lock().take() {
            handle.abort();
        }
        warn!(queue = %self.inner.queue, "RPC server dropped without close()");
    }
}

impl ServerInner {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>) {
        while !self.is_closing() {
            let popped = self
                .subscriber
                .pop_blocking(&self.queue, Some(self.config.dequeue_poll))
                .await;

            let encoded = match popped {
                Ok(Some(encoded)) => encoded,
                Ok(None) => continue,
                Err(BrokerError::ConnectionClosed) => break,
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Dequeue failed");
                    tokio::time::sleep(DEQUEUE_RETRY_DELAY).await;
                    continue;
                }
            };

            debug!(queue = %self.queue, request = %encoded, "REQ <--");

            let envelope = match RequestEnvelope::decode(&encoded) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        queue = %self.queue,
                        error = %e,
                        "Dropping malformed request"
                    );
                    continue;
                }
            };

            // Tracked before the closing check: shutdown either waits for
            // this entry or the entry sees the flag and hands the request back.
            let guard = self.in_flight.track(envelope.id.clone());

            if self.is_closing() {
                self.hand_back(&envelope, &encoded).await;
                drop(guard);
                break;
            }

            let server = self.clone();
            tokio::spawn(async move {
                server.handle(envelope, guard).await;
            });
        }

        debug!(queue = %self.queue, "Dequeue loop stopped");
    }

    /// Return a request dequeued after shutdown began to the head of its queue.
    async fn hand_back(&self, envelope: &RequestEnvelope, encoded: &str) {
        match self.publisher.push_front(&self.queue, encoded).await {
            Ok(_) => info!(
                id = %envelope.id,
                queue = %self.queue,
                "Returned request dequeued during shutdown"
            ),
            Err(e) => error!(
                id = %envelope.id,
                queue = %self.queue,
                error = %e,
                "Failed to return request dequeued during shutdown"
            ),
        }
    }

    async fn handle(self: Arc<Self>, envelope: RequestEnvelope, _guard: InFlightGuard) {
        let RequestEnvelope {
            id,
            method,
            params,
            meta,
        } = envelope;
        let replier = Replier::new(id, meta.reply_channel, self.publisher.clone());

        if let Err(e) = replier.ack().await {
            warn!(id = %replier.id(), error = %e, "Ack publish failed");
        }

        let call = IncomingCall {
            method,
            params,
            replier: replier.clone(),
        };

        let outcome = AssertUnwindSafe(self.handler.handle(call))
            .catch_unwind()
            .await;

        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(fault)) => Some(fault),
            Err(panic) => Some(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        if let Some(fault) = fault {
            warn!(id = %replier.id(), fault = %fault, "Handler failed");
            if let Err(e) = replier.reply_with_fault(&fault).await {
                debug!(id = %replier.id(), error = %e, "Fault reply not sent");
            }
        } else if !replier.has_replied() {
            warn!(id = %replier.id(), "Handler finished without replying");
            let fault = anyhow::anyhow!("handler finished without replying");
            if let Err(e) = replier.reply_with_fault(&fault).await {
                debug!(id = %replier.id(), error = %e, "Fallback reply not sent");
            }
        }
    }

    async fn shutdown(&self) -> Result<(), ServerError> {
        info!(queue = %self.queue, "RPC server closing");
        self.closing.store(true, Ordering::SeqCst);

        // (a) stop dequeuing
        self.subscriber.quit().await?;
        let dequeue_loop = self.dequeue_loop.lock().take();
        if let Some(handle) = dequeue_loop {
            if let Err(e) = handle.await {
                error!(queue = %self.queue, error = %e, "Dequeue loop ended abnormally");
            }
        }

        // (b) drain
        self.in_flight.wait_drained().await;

        // (c) close the reply connection
        self.publisher.quit().await?;

        info!(queue = %self.queue, "RPC server closed");
        Ok(())
    }
}
