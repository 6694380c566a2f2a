//! # In-Memory Broker
//!
//! Single-process implementation of the broker contract. Lists live in one
//! shared map guarded by a mutex; channels use `tokio::sync::broadcast` for
//! multi-producer, multi-consumer fan-out.

use crate::connection::{Broker, BrokerConnection, BrokerError};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tracing::debug;

/// State shared by every connection of one broker.
struct BrokerState {
    /// Named FIFO lists.
    lists: Mutex<HashMap<String, VecDeque<String>>>,

    /// Woken on every push so blocked pops re-check their list.
    pushed: Notify,

    /// Broadcast sender per channel.
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,

    /// Broadcast buffer per channel.
    capacity: usize,

    /// Connections opened so far.
    connections_opened: AtomicU64,
}

impl BrokerState {
    fn pop_front(&self, list: &str) -> Option<String> {
        let mut lists = self.lists.lock();
        let queue = lists.get_mut(list)?;
        let value = queue.pop_front();
        if queue.is_empty() {
            lists.remove(list);
        }
        value
    }

    /// Forget `channel` if no receiver other than the `held` ones remains.
    fn release_channel(&self, channel: &str, held: usize) {
        let mut channels = self.channels.write();
        let idle = channels
            .get(channel)
            .is_some_and(|sender| sender.receiver_count() <= held);
        if idle {
            channels.remove(channel);
            debug!(channel = channel, "Channel released");
        }
    }
}

/// In-memory implementation of the broker.
///
/// Suitable for single-process operation and tests; multi-process
/// deployments plug a networked backend in behind the same traits.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create a broker with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a broker with the given per-channel buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(BrokerState {
                lists: Mutex::new(HashMap::new()),
                pushed: Notify::new(),
                channels: RwLock::new(HashMap::new()),
                capacity,
                connections_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Open a connection without going through the trait object.
    #[must_use]
    pub fn open(&self) -> InMemoryConnection {
        let (closed, _) = watch::channel(false);
        let number = self.state.connections_opened.fetch_add(1, Ordering::Relaxed);
        debug!(connection = number, "In-memory broker connection opened");
        InMemoryConnection {
            state: self.state.clone(),
            closed,
            number,
        }
    }

    /// Snapshot of a list, head first.
    #[must_use]
    pub fn list_snapshot(&self, list: &str) -> Vec<String> {
        self.state
            .lists
            .lock()
            .get(list)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .channels
            .read()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Number of channels with at least one live subscription.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.state.channels.read().len()
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        Ok(Arc::new(self.open()))
    }
}

/// One connection to an [`InMemoryBroker`].
pub struct InMemoryConnection {
    state: Arc<BrokerState>,
    closed: watch::Sender<bool>,
    number: u64,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if *self.closed.borrow() {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn push(&self, list: &str, value: &str) -> Result<usize, BrokerError> {
        self.ensure_open()?;
        let len = {
            let mut lists = self.state.lists.lock();
            let queue = lists.entry(list.to_string()).or_default();
            queue.push_back(value.to_string());
            queue.len()
        };
        self.state.pushed.notify_waiters();
        Ok(len)
    }

    async fn push_front(&self, list: &str, value: &str) -> Result<usize, BrokerError> {
        self.ensure_open()?;
        let len = {
            let mut lists = self.state.lists.lock();
            let queue = lists.entry(list.to_string()).or_default();
            queue.push_front(value.to_string());
            queue.len()
        };
        self.state.pushed.notify_waiters();
        Ok(len)
    }

    async fn pop_blocking(
        &self,
        list: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, BrokerError> {
        self.ensure_open()?;
        // A timeout too large to represent as an instant waits without a deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut closed = self.closed.subscribe();

        loop {
            // Register for wakeups before checking, so a push between the
            // check and the await is not missed.
            let notified = self.state.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.state.pop_front(list) {
                return Ok(Some(value));
            }

            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = &mut notified => {}
                _ = closed.wait_for(|closed| *closed) => {
                    return Err(BrokerError::ConnectionClosed);
                }
                () = expired => return Ok(None),
            }
        }
    }

    async fn remove(&self, list: &str, value: &str) -> Result<usize, BrokerError> {
        self.ensure_open()?;
        let mut lists = self.state.lists.lock();
        let Some(queue) = lists.get_mut(list) else {
            return Ok(0);
        };

        let before = queue.len();
        queue.retain(|entry| entry != value);
        let removed = before - queue.len();
        if queue.is_empty() {
            lists.remove(list);
        }
        Ok(removed)
    }

    async fn len(&self, list: &str) -> Result<usize, BrokerError> {
        self.ensure_open()?;
        Ok(self.state.lists.lock().get(list).map_or(0, VecDeque::len))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, BrokerError> {
        self.ensure_open()?;
        let sender = self.state.channels.read().get(channel).cloned();
        let Some(sender) = sender else {
            debug!(channel = channel, "Message dropped (no subscribers)");
            return Ok(0);
        };

        match sender.send(message.to_string()) {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                debug!(channel = channel, "Message dropped (no subscribers)");
                self.state.release_channel(channel, 0);
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        let receiver = self
            .state
            .channels
            .write()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.state.capacity).0)
            .subscribe();

        debug!(
            connection = self.number,
            channel = channel,
            "New subscription created"
        );

        let state: Weak<BrokerState> = Arc::downgrade(&self.state);
        let name = channel.to_string();
        Ok(
            Subscription::new(channel, receiver, self.closed.subscribe()).on_release(move || {
                if let Some(state) = state.upgrade() {
                    state.release_channel(&name, 1);
                }
            }),
        )
    }

    async fn quit(&self) -> Result<(), BrokerError> {
        let was_open = !self.closed.send_replace(true);
        if was_open {
            debug!(connection = self.number, "In-memory broker connection quit");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
