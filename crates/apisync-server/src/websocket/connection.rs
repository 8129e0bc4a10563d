//! Per-connection state: outbound queue, liveness flags, watch set.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use apisync_core::{ConnectionId, ServerMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A connected peer.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the peer has answered the last ping.
    is_alive: AtomicBool,
    /// Consecutive sweeps without an answer.
    missed_pongs: AtomicU32,
    /// Full keys this connection receives updates for.
    watch: Mutex<HashSet<String>>,
    /// Cancelled to terminate the transport.
    cancel: CancellationToken,
    /// Set once by whichever path removes the connection first.
    leaving: AtomicBool,
    /// Count of messages dropped due to full channel.
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            missed_pongs: AtomicU32::new(0),
            watch: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
            leaving: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::metrics::WS_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Encode and queue a server message.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.encode() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, kind = message.kind(), error = %e, "failed to encode message");
                false
            }
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        self.missed_pongs.store(0, Ordering::Relaxed);
    }

    /// Whether the peer answered since the last sweep.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Record an unanswered sweep and return the new count.
    pub fn record_missed_pong(&self) -> u32 {
        self.missed_pongs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Consecutive unanswered sweeps.
    pub fn missed_pongs(&self) -> u32 {
        self.missed_pongs.load(Ordering::Relaxed)
    }

    /// Start watching `key`. Returns `false` if it was already watched.
    pub fn watch(&self, key: &str) -> bool {
        self.watch.lock().insert(key.to_owned())
    }

    /// Stop watching `key`. Returns `false` if it was not watched.
    pub fn unwatch(&self, key: &str) -> bool {
        self.watch.lock().remove(key)
    }

    /// Whether `key` is in the watch set.
    pub fn is_watching(&self, key: &str) -> bool {
        self.watch.lock().contains(key)
    }

    /// Snapshot of the watch set, sorted.
    pub fn watched(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.watch.lock().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Ask the transport to close.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    /// Whether [`terminate`](Self::terminate) was called.
    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled on termination.
    pub fn termination_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Claim the right to remove this connection.
    ///
    /// Returns `true` exactly once.
    pub(crate) fn begin_leave(&self) -> bool {
        !self.leaving.swap(true, Ordering::AcqRel)
    }

    /// Whether removal has started.
    pub fn is_leaving(&self) -> bool {
        self.leaving.load(Ordering::Acquire)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("is_alive", &self.is_alive())
            .field("missed_pongs", &self.missed_pongs())
            .field("watch", &self.watched())
            .finish_non_exhaustive()
    }
}
