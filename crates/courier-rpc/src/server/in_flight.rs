//! Acknowledged-but-unanswered requests of one server.
//!
//! Entries are keyed by a local sequence number rather than the request id,
//! since ids come from clients and are not trusted to be unique.

use crate::domain::request_id::RequestId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct InFlightState {
    entries: DashMap<u64, RequestId>,
    next_seq: AtomicU64,
    drained: Notify,
}

/// Unordered collection of in-flight requests.
#[derive(Clone, Default)]
pub struct InFlightSet {
    state: Arc<InFlightState>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request. The entry lives until the returned guard drops.
    pub fn track(&self, id: RequestId) -> InFlightGuard {
        let seq = self.state.next_seq.fetch_add(1, Ordering::Relaxed);
        self.state.entries.insert(seq, id);
        InFlightGuard {
            state: self.state.clone(),
            seq,
        }
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    /// Ids currently in flight, in no particular order.
    pub fn ids(&self) -> Vec<RequestId> {
        self.state
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Resolve once the collection is empty.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.state.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }

            debug!(in_flight = self.len(), "Waiting for in-flight requests");
            notified.await;
        }
    }
}

/// Removes its entry on drop, whichever way the handling ended.
pub struct InFlightGuard {
    state: Arc<InFlightState>,
    seq: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.entries.remove(&self.seq);
        if self.state.entries.is_empty() {
            self.state.drained.notify_waiters();
        }
    }
}
