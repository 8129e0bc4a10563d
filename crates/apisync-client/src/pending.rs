//! Pending-call table: request id to single-use resolver.

use std::collections::HashMap;

use apisync_core::FunctionResponse;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Outstanding calls awaiting a `function-response`.
///
/// Every entry leaves the table exactly once: on its response, on timeout
/// via [`remove`](Self::remove), or in bulk via [`reject_all`](Self::reject_all).
/// Dropping the sender is what rejects the waiting caller.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<String, oneshot::Sender<FunctionResponse>>>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request_id` and return the receiver its response resolves.
    pub fn insert(&self, request_id: &str) -> oneshot::Receiver<FunctionResponse> {
        let (tx, rx) = oneshot::channel();
        let _ = self.calls.lock().insert(request_id.to_owned(), tx);
        rx
    }

    /// Resolve `request_id`. Returns `false` for unknown or already-settled ids.
    pub fn resolve(&self, request_id: &str, response: FunctionResponse) -> bool {
        let Some(tx) = self.calls.lock().remove(request_id) else {
            return false;
        };
        tx.send(response).is_ok()
    }

    /// Drop a single entry (timed out or never sent).
    pub fn remove(&self, request_id: &str) -> bool {
        self.calls.lock().remove(request_id).is_some()
    }

    /// Reject every outstanding call. Returns how many were pending.
    pub fn reject_all(&self) -> usize {
        let drained: Vec<_> = self.calls.lock().drain().collect();
        drained.len()
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether no call is outstanding.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}
