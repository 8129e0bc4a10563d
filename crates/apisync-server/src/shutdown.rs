//! Server shutdown: one cancellation token plus the tasks that must drain.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits by default.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Cancels the listener and liveness supervisor, and waits for them.
///
/// [`SyncServer::listen`](crate::SyncServer::listen) registers the tasks it
/// spawns here; cancelling evicts every connection before the listener stops.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Coordinator with nothing tracked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by server tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a task to wait for in [`drain`](Self::drain).
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Number of tracked tasks not yet drained.
    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown was signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown and wait up to `timeout` for every tracked task.
    ///
    /// Returns `false` if some task was still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(tasks = tasks.len(), timeout_secs = timeout.as_secs(), "draining server tasks");

        let finished = tokio::time::timeout(timeout, futures::future::join_all(tasks))
            .await
            .is_ok();
        if !finished {
            warn!(?timeout, "server tasks still running at shutdown deadline");
        }
        finished
    }
}
