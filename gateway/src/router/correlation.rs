//! Correlation engine matching plugin responses to waiting callers.
//!
//! Each in-flight call owns a fresh id from an atomic counter and a oneshot
//! waiter parked in a concurrent map. Whatever path a call takes out of the
//! table (response, timeout, channel failure) removes the waiter exactly
//! once; a response arriving after removal is an orphan and is dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use devicehub_plugin_api::CanonicalResponse;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Default)]
pub struct CorrelationTable {
    next_id: AtomicU64,
    waiters: DashMap<u64, oneshot::Sender<CanonicalResponse>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a correlation id. Ids start at 1; 0 is never a live id.
    pub fn next_correlation_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Park a waiter for `correlation_id` and return the receiving half.
    pub fn register(&self, correlation_id: u64) -> oneshot::Receiver<CanonicalResponse> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.insert(correlation_id, sender);
        receiver
    }

    /// Complete the waiter for the response's correlation id. Returns false
    /// when no waiter exists (late or unsolicited response).
    pub fn complete(&self, response: CanonicalResponse) -> bool {
        match self.waiters.remove(&response.correlation_id) {
            Some((id, sender)) => sender.send(response).map(|_| true).unwrap_or_else(|_| {
                debug!(correlation_id = id, "waiter gone before completion");
                false
            }),
            None => {
                debug!(
                    correlation_id = response.correlation_id,
                    "dropping orphan response"
                );
                false
            }
        }
    }

    /// Remove the waiter without completing it (timeout, send failure).
    pub fn cancel(&self, correlation_id: u64) {
        self.waiters.remove(&correlation_id);
    }

    /// Number of calls currently awaiting a response.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_nonzero() {
        let table = CorrelationTable::new();
        let a = table.next_correlation_id();
        let b = table.next_correlation_id();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn complete_reaches_the_registered_waiter() {
        let table = CorrelationTable::new();
        let id = table.next_correlation_id();
        let receiver = table.register(id);
        assert!(table.complete(CanonicalResponse::ok(id)));
        let response = receiver.await.unwrap();
        assert_eq!(response.correlation_id, id);
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn orphan_responses_are_dropped() {
        let table = CorrelationTable::new();
        assert!(!table.complete(CanonicalResponse::ok(999)));
    }

    #[test]
    fn cancel_removes_the_waiter() {
        let table = CorrelationTable::new();
        let id = table.next_correlation_id();
        let _receiver = table.register(id);
        table.cancel(id);
        assert_eq!(table.pending(), 0);
        assert!(!table.complete(CanonicalResponse::ok(id)));
    }
}
