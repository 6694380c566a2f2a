//! Pending request store for one client.
//!
//! Maps request ids to the two waiters of an outstanding call: the ack
//! waiter and the terminal-reply waiter. The reply listener feeds every
//! decoded envelope to [`PendingRequestStore::deliver`].

use crate::domain::envelope::{ErrorBody, Reply, ReplyEnvelope};
use crate::domain::request_id::RequestId;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Terminal outcome delivered to a waiting call.
pub type TerminalReply = Result<Value, ErrorBody>;

/// A request waiting for its ack and reply
struct PendingRequest {
    /// Taken by the first ack (or terminal reply)
    ack: Option<oneshot::Sender<()>>,
    /// Taken by the first terminal reply
    response: Option<oneshot::Sender<TerminalReply>>,
    created_at: Instant,
    method: String,
}

/// Receiving halves handed to the caller by [`PendingRequestStore::register`].
pub struct PendingWaiters {
    pub ack: oneshot::Receiver<()>,
    pub response: oneshot::Receiver<TerminalReply>,
}

/// Statistics for the pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total terminal replies applied
    pub total_completed: AtomicU64,
    /// Envelopes for unknown or already-settled ids
    pub total_unrecognized: AtomicU64,
}

/// Pending request store.
///
/// Flow:
/// 1. `request()` generates a [`RequestId`] and calls `register()`
/// 2. The envelope is pushed to the server queue
/// 3. The reply listener calls `deliver()` for every envelope it receives
/// 4. `request()` awaits the waiters, then removes the entry on every exit
#[derive(Default)]
pub struct PendingRequestStore {
    pending: DashMap<RequestId, PendingRequest>,
    stats: PendingStats,
}

impl PendingRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and get its waiters.
    pub fn register(&self, id: RequestId, method: &str) -> PendingWaiters {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();

        debug!(id = %id, method = method, "Registered pending request");

        self.pending.insert(
            id,
            PendingRequest {
                ack: Some(ack_tx),
                response: Some(response_tx),
                created_at: Instant::now(),
                method: method.to_string(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        PendingWaiters {
            ack: ack_rx,
            response: response_rx,
        }
    }

    /// Apply an incoming envelope to its pending request.
    ///
    /// Returns true if the envelope settled a waiter. A duplicate, late, or
    /// unknown envelope is logged and ignored.
    pub fn deliver(&self, envelope: ReplyEnvelope) -> bool {
        let ReplyEnvelope { id, reply } = envelope;

        let Some(mut entry) = self.pending.get_mut(&id) else {
            self.stats.total_unrecognized.fetch_add(1, Ordering::Relaxed);
            warn!(id = %id, "Reply for unknown or expired request");
            return false;
        };

        // A terminal reply implies the request was claimed.
        let acked = match entry.ack.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        };

        let terminal = match reply {
            Reply::Ack => {
                if !acked {
                    debug!(id = %id, "Duplicate ack ignored");
                }
                return acked;
            }
            Reply::Result(value) => Ok(value),
            Reply::Error(body) => Err(body),
        };

        let Some(tx) = entry.response.take() else {
            self.stats.total_unrecognized.fetch_add(1, Ordering::Relaxed);
            debug!(id = %id, "Duplicate reply ignored");
            return false;
        };

        let elapsed = entry.created_at.elapsed();
        let delivered = tx.send(terminal).is_ok();
        if delivered {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                id = %id,
                method = %entry.method,
                response_time_ms = elapsed.as_millis(),
                "Completed pending request"
            );
        }
        delivered
    }

    /// Drop the entry for `id`. Later envelopes for it become unrecognized.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    /// Entry removal tied to a scope.
    pub fn guard(&self, id: RequestId) -> PendingGuard<'_> {
        PendingGuard { store: self, id }
    }
}

/// Removes its pending entry when dropped, on every exit path of a call.
pub struct PendingGuard<'a> {
    store: &'a PendingRequestStore,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.store.remove(&self.id);
    }
}
