//! # Broker Connection
//!
//! The capability contract Courier expects from a broker. Durability and
//! delivery guarantees belong to the backend; this crate only fixes the
//! operations and their failure modes.

use crate::subscriber::Subscription;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from broker operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The connection was quit; no further commands are accepted.
    #[error("Broker connection closed")]
    ConnectionClosed,

    /// The backend rejected or failed the command.
    #[error("Broker backend error: {0}")]
    Backend(String),
}

/// Factory for private broker connections.
///
/// Equivalent to duplicating a shared client connection: each call yields an
/// independent connection that can be quit without affecting the others.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// One broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Append `value` to the tail of `list`.
    ///
    /// # Returns
    ///
    /// The length of the list after the push.
    async fn push(&self, list: &str, value: &str) -> Result<usize, BrokerError>;

    /// Put `value` back at the head of `list`, ahead of everything queued.
    async fn push_front(&self, list: &str, value: &str) -> Result<usize, BrokerError>;

    /// Pop the head of `list`, waiting until an element is available.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` - The dequeued element
    /// - `Ok(None)` - `timeout` elapsed with the list still empty
    /// - `Err(BrokerError::ConnectionClosed)` - The connection was quit while waiting
    async fn pop_blocking(
        &self,
        list: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, BrokerError>;

    /// Atomically remove every element of `list` equal to `value`.
    ///
    /// # Returns
    ///
    /// The number of removed elements (0 if someone already popped it).
    async fn remove(&self, list: &str, value: &str) -> Result<usize, BrokerError>;

    /// Current length of `list`.
    async fn len(&self, list: &str) -> Result<usize, BrokerError>;

    /// Publish `message` to every current subscriber of `channel`.
    ///
    /// # Returns
    ///
    /// The number of subscribers that received the message.
    async fn publish(&self, channel: &str, message: &str) -> Result<usize, BrokerError>;

    /// Subscribe to `channel`.
    ///
    /// The subscription ends (yields `None`) when this connection is quit.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError>;

    /// Gracefully terminate the connection. Calling it twice is a no-op.
    async fn quit(&self) -> Result<(), BrokerError>;

    /// Whether [`quit`](Self::quit) has been called.
    fn is_closed(&self) -> bool;
}
