//! Registry of open connections and the single eviction path.

use std::collections::HashMap;
use std::sync::Arc;

use apisync_core::{ConnectionId, ServerMessage};
use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::connection::Connection;
use crate::hooks::{self, LifecycleHooks, NoopHooks};
use crate::metrics::{
    UPDATES_SENT_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_DISCONNECTIONS_TOTAL,
};

/// Why a connection left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveReason {
    /// The transport closed.
    Closed,
    /// The peer stopped answering pings.
    Unresponsive,
    /// The server is shutting down.
    Shutdown,
}

impl LeaveReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Unresponsive => "unresponsive",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Every open connection, indexed by id.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    hooks: Arc<dyn LifecycleHooks>,
}

impl ConnectionRegistry {
    /// Create a registry that fires `hooks` on join and leave.
    pub fn new(hooks: Arc<dyn LifecycleHooks>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            hooks,
        }
    }

    /// Register a connection, queue `schema_frame` to it, then fire `on_join`.
    pub fn admit(&self, connection: Arc<Connection>, schema_frame: Arc<String>) {
        let _ = self
            .connections
            .write()
            .insert(connection.id.clone(), connection.clone());
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

        if !connection.send(schema_frame) {
            warn!(conn_id = %connection.id, "failed to enqueue schema");
        }
        hooks::invoke("on_join", &connection, || self.hooks.on_join(&connection));
    }

    /// Remove a connection.
    ///
    /// Both the close handler and the liveness sweep come through here; only
    /// the first caller for a given connection does anything. Order:
    /// `on_before_leave`, terminate, remove, `on_after_leave`.
    /// Returns `true` if this call performed the removal.
    pub fn evict(&self, id: &ConnectionId, reason: LeaveReason) -> bool {
        let Some(connection) = self.get(id) else {
            return false;
        };
        if !connection.begin_leave() {
            return false;
        }

        hooks::invoke("on_before_leave", &connection, || {
            self.hooks.on_before_leave(&connection);
        });
        connection.terminate();
        let _ = self.connections.write().remove(id);
        hooks::invoke("on_after_leave", &connection, || {
            self.hooks.on_after_leave(&connection);
        });

        info!(conn_id = %id, reason = reason.as_str(), "connection removed");
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
        true
    }

    /// Evict every connection.
    pub fn evict_all(&self, reason: LeaveReason) -> usize {
        self.ids()
            .iter()
            .filter(|id| self.evict(id, reason))
            .count()
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Snapshot of all connections.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Ids of all connections.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().cloned().collect()
    }

    /// Connections whose watch set contains exactly `key`.
    pub fn watchers(&self, key: &str) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.is_watching(key))
            .cloned()
            .collect()
    }

    /// Send an `update` for `key` to every watcher. Returns the recipient count.
    pub fn broadcast_update(&self, key: &str, data: Option<Value>) -> usize {
        let message = ServerMessage::Update {
            key: key.to_owned(),
            data,
        };
        let frame = match message.encode() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(key, error = %e, "failed to encode update");
                return 0;
            }
        };

        let conns = self.connections.read();
        let mut recipients = 0;
        for conn in conns.values().filter(|c| c.is_watching(key)) {
            if conn.send(frame.clone()) {
                recipients += 1;
            } else {
                warn!(conn_id = %conn.id, key, "failed to send update to connection");
            }
        }
        debug!(key, recipients, "broadcast update");
        counter!(UPDATES_SENT_TOTAL).increment(recipients as u64);
        recipients
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is open.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(NoopHooks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_connection;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl LifecycleHooks for Recorder {
        fn on_join(&self, connection: &Connection) {
            self.events.lock().push(format!("join:{}", connection.is_terminated()));
        }
        fn on_before_leave(&self, connection: &Connection) {
            self.events.lock().push(format!("before:{}", connection.is_terminated()));
        }
        fn on_after_leave(&self, connection: &Connection) {
            self.events.lock().push(format!("after:{}", connection.is_terminated()));
        }
    }

    fn frame(text: &str) -> Arc<String> {
        Arc::new(text.to_owned())
    }

    #[tokio::test]
    async fn admit_queues_schema_then_joins() {
        let hooks = Arc::new(Recorder::default());
        let registry = ConnectionRegistry::new(hooks.clone());
        let (conn, mut rx) = make_connection();

        registry.admit(conn.clone(), frame("schema"));

        assert_eq!(registry.len(), 1);
        assert_eq!(&*rx.recv().await.unwrap(), "schema");
        assert_eq!(*hooks.events.lock(), vec!["join:false"]);
    }

    #[test]
    fn evict_runs_hooks_once_in_order() {
        let hooks = Arc::new(Recorder::default());
        let registry = ConnectionRegistry::new(hooks.clone());
        let (conn, _rx) = make_connection();
        registry.admit(conn.clone(), frame("schema"));

        assert!(registry.evict(&conn.id, LeaveReason::Unresponsive));
        assert!(!registry.evict(&conn.id, LeaveReason::Closed));

        assert!(registry.is_empty());
        assert!(conn.is_terminated());
        // before-leave sees a live transport, after-leave a terminated one
        assert_eq!(*hooks.events.lock(), vec!["join:false", "before:false", "after:true"]);
    }

    #[test]
    fn evict_unknown_is_noop() {
        let registry = ConnectionRegistry::default();
        let (conn, _rx) = make_connection();
        assert!(!registry.evict(&conn.id, LeaveReason::Closed));
    }

    #[test]
    fn evict_all_empties_registry() {
        let registry = ConnectionRegistry::default();
        let (a, _ra) = make_connection();
        let (b, _rb) = make_connection();
        registry.admit(a.clone(), frame("s"));
        registry.admit(b.clone(), frame("s"));
        assert_eq!(registry.evict_all(LeaveReason::Shutdown), 2);
        assert!(registry.is_empty());
        assert!(a.is_terminated() && b.is_terminated());
    }

    #[test]
    fn panicking_hook_does_not_break_eviction() {
        struct Exploding;
        impl LifecycleHooks for Exploding {
            fn on_before_leave(&self, _connection: &Connection) {
                panic!("boom");
            }
        }
        let registry = ConnectionRegistry::new(Arc::new(Exploding));
        let (conn, _rx) = make_connection();
        registry.admit(conn.clone(), frame("s"));
        assert!(registry.evict(&conn.id, LeaveReason::Closed));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_exact_key_watchers_only() {
        let registry = ConnectionRegistry::default();
        let (a, mut ra) = make_connection();
        let (b, mut rb) = make_connection();
        let (c, mut rc) = make_connection();
        for conn in [&a, &b, &c] {
            registry.admit(conn.clone(), frame("schema"));
        }
        let _ = ra.recv().await;
        let _ = rb.recv().await;
        let _ = rc.recv().await;

        let _ = a.watch("room.count|A");
        let _ = b.watch("room.count|B");
        let _ = c.watch("room.count");

        let sent = registry.broadcast_update("room.count|A", Some(serde_json::json!(10)));
        assert_eq!(sent, 1);

        let msg: Value = serde_json::from_str(&ra.recv().await.unwrap()).unwrap();
        assert_eq!(msg, serde_json::json!({"type": "update", "key": "room.count|A", "data": 10}));
        assert!(rb.try_recv().is_err());
        assert!(rc.try_recv().is_err());
    }

    #[test]
    fn watchers_filters_by_key() {
        let registry = ConnectionRegistry::default();
        let (a, _ra) = make_connection();
        let (b, _rb) = make_connection();
        registry.admit(a.clone(), frame("s"));
        registry.admit(b.clone(), frame("s"));
        let _ = a.watch("k");
        let watchers = registry.watchers("k");
        assert_eq!(watchers.len(), 1);
        assert_eq!(watchers[0].id, a.id);
    }

    #[test]
    fn leave_reason_labels() {
        assert_eq!(LeaveReason::Closed.as_str(), "closed");
        assert_eq!(LeaveReason::Unresponsive.as_str(), "unresponsive");
        assert_eq!(LeaveReason::Shutdown.as_str(), "shutdown");
    }
}
