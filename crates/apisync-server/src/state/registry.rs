//! Lookup of current values by key, used when a connection starts watching.

use std::collections::HashMap;
use std::sync::Arc;

use apisync_core::{Key, ServerMessage};
use serde_json::Value;

use crate::websocket::connection::Connection;

/// Anything that can report the current value of a keyed slot.
///
/// [`State`](super::State) implements it from its stored slots. Custom
/// sources can compute a value per connection.
pub trait StateSource: Send + Sync {
    /// Current value for `dependency` as seen by `connection`, if any.
    fn current(&self, connection: &Connection, dependency: &str) -> Option<Value>;

    /// Queue the current value to `connection` as an update on `key`.
    ///
    /// Sources that broadcast changes must queue while holding the lock their
    /// writers broadcast under, or a concurrent write can be overtaken by the
    /// older value. Returns whether a frame was queued.
    fn push_current(&self, connection: &Connection, key: &str, dependency: &str) -> bool {
        self.current(connection, dependency)
            .is_some_and(|data| send_current(connection, key, data))
    }
}

/// Queue `data` to `connection` as an `update` on `key`.
pub(crate) fn send_current(connection: &Connection, key: &str, data: Value) -> bool {
    connection.send_message(&ServerMessage::Update {
        key: key.to_owned(),
        data: Some(data),
    })
}

/// Base path → state source, built once when the namespace is mounted.
#[derive(Default)]
pub struct StateRegistry {
    sources: HashMap<String, Arc<dyn StateSource>>,
}

impl StateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, path: impl Into<String>, source: Arc<dyn StateSource>) {
        let _ = self.sources.insert(path.into(), source);
    }

    /// Current value for a full key, if its base path is a state that has one.
    pub fn current(&self, connection: &Connection, key: &Key) -> Option<Value> {
        self.sources
            .get(key.path())
            .and_then(|source| source.current(connection, key.dependency()))
    }

    /// Queue the current value for a full key to a watcher that just joined.
    pub fn push_current(&self, connection: &Connection, key: &Key) -> bool {
        self.sources
            .get(key.path())
            .is_some_and(|source| source.push_current(connection, &key.to_string(), key.dependency()))
    }

    /// Whether `path` is a mounted state.
    pub fn contains(&self, path: &str) -> bool {
        self.sources.contains_key(path)
    }

    /// Number of mounted states.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no state is mounted.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_connection;
    use serde_json::json;

    struct PerConnection;

    impl StateSource for PerConnection {
        fn current(&self, connection: &Connection, dependency: &str) -> Option<Value> {
            (dependency == "me").then(|| json!(connection.id.as_str()))
        }
    }

    #[test]
    fn current_resolves_base_path_and_dependency() {
        let mut registry = StateRegistry::new();
        registry.insert("user.self", Arc::new(PerConnection));
        let (conn, _rx) = make_connection();

        assert_eq!(
            registry.current(&conn, &Key::parse("user.self|me")),
            Some(json!(conn.id.as_str()))
        );
        assert_eq!(registry.current(&conn, &Key::parse("user.self")), None);
        assert_eq!(registry.current(&conn, &Key::parse("user.other|me")), None);
    }

    #[test]
    fn push_current_queues_update_under_canonical_key() {
        let mut registry = StateRegistry::new();
        registry.insert("user.self", Arc::new(PerConnection));
        let (conn, mut rx) = make_connection();

        assert!(registry.push_current(&conn, &Key::parse("user.self|me")));
        assert!(!registry.push_current(&conn, &Key::parse("user.self")));
        assert!(!registry.push_current(&conn, &Key::parse("nope|me")));

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame, json!({"type": "update", "key": "user.self|me", "data": conn.id.as_str()}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn contains_and_len() {
        let mut registry = StateRegistry::new();
        assert!(registry.is_empty());
        registry.insert("a", Arc::new(PerConnection));
        assert!(registry.contains("a"));
        assert!(!registry.contains("b"));
        assert_eq!(registry.len(), 1);
    }
}
