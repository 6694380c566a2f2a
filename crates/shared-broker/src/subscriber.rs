//! # Channel Subscriber
//!
//! Receiving side of a pub/sub channel.

use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Hook run once when a subscription is dropped.
type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// A subscription handle for receiving channel messages.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    /// Channel name (for logging).
    channel: String,

    /// The broadcast receiver for the channel.
    receiver: broadcast::Receiver<String>,

    /// Flips to `true` when the owning connection quits.
    closed: watch::Receiver<bool>,

    /// Lets the backend forget the channel once nobody listens.
    release: Option<ReleaseHook>,
}

impl Subscription {
    /// Create a subscription over a broadcast receiver.
    ///
    /// `closed` is the owning connection's close signal; backends other than
    /// the in-memory broker bridge into this by forwarding onto a broadcast
    /// channel.
    pub fn new(
        channel: impl Into<String>,
        receiver: broadcast::Receiver<String>,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            closed,
            release: None,
        }
    }

    /// Run `release` when this subscription is dropped.
    ///
    /// The hook runs while this subscription's receiver is still alive.
    #[must_use]
    pub fn on_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Receive the next message.
    ///
    /// # Returns
    ///
    /// - `Some(message)` - The next message published on the channel
    /// - `None` - The connection was quit or the broker dropped the channel
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            if *self.closed.borrow() {
                return None;
            }

            tokio::select! {
                received = self.receiver.recv() => match received {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::RecvError::Closed) => return None,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!(
                            channel = %self.channel,
                            lagged = count,
                            "Subscriber lagged, some messages dropped"
                        );
                        continue;
                    }
                },
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// The subscribed channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(channel = %self.channel, "Subscription dropped");
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
