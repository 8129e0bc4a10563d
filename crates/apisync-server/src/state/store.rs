//! States: signals that keep the last value per dependency.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::registry::{StateSource, send_current};
use super::signal::Signal;
use crate::websocket::connection::Connection;

/// Keyed state with one slot per dependency (`""` is the default slot).
///
/// Every mutation that changes a slot is broadcast to the watchers of
/// `key|dependency` while the slot lock is held, so all watchers see values
/// in mutation order. Clones share slots and key.
pub struct State<T> {
    signal: Signal<T>,
    slots: Arc<Mutex<HashMap<String, T>>>,
}

impl<T> State<T> {
    /// Create an unmounted state with no values.
    pub fn new() -> Self {
        Self {
            signal: Signal::new(),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a state seeded with `initial` slots.
    pub fn with_initial<K, I>(initial: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, T)>,
    {
        let slots = initial.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            signal: Signal::new(),
            slots: Arc::new(Mutex::new(slots)),
        }
    }

    /// Dotted key, once mounted.
    pub fn key(&self) -> Option<&str> {
        self.signal.key()
    }

    /// The underlying signal, for ad-hoc or per-connection emits.
    pub fn signal(&self) -> &Signal<T> {
        &self.signal
    }

    /// Dependencies that currently hold a value, sorted.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self.slots.lock().keys().cloned().collect();
        deps.sort();
        deps
    }
}

impl<T: Serialize + Clone + PartialEq> State<T> {
    /// Current value of a slot.
    pub fn get(&self, dependency: &str) -> Option<T> {
        self.slots.lock().get(dependency).cloned()
    }

    /// Write a slot and broadcast it, unless it already holds an equal value.
    ///
    /// Returns whether anything changed.
    pub fn set(&self, value: T, dependency: &str) -> bool {
        let mut slots = self.slots.lock();
        if slots.get(dependency) == Some(&value) {
            return false;
        }
        self.publish(dependency, Some(&value));
        let _ = slots.insert(dependency.to_owned(), value);
        true
    }

    /// Write a slot and broadcast it even if the value is unchanged.
    pub fn force_set(&self, value: T, dependency: &str) {
        let mut slots = self.slots.lock();
        self.publish(dependency, Some(&value));
        let _ = slots.insert(dependency.to_owned(), value);
    }

    /// Remove a slot and broadcast "no value". Returns the removed value.
    pub fn delete(&self, dependency: &str) -> Option<T> {
        let mut slots = self.slots.lock();
        let previous = slots.remove(dependency);
        self.publish(dependency, None);
        previous
    }

    /// Read-modify-write a slot under its lock.
    ///
    /// `f` receives the current value. Returning `None` deletes the slot; an
    /// unchanged result is a no-op. Returns whether anything changed.
    pub fn update<F>(&self, dependency: &str, f: F) -> bool
    where
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let mut slots = self.slots.lock();
        let next = f(slots.get(dependency));
        if next.as_ref() == slots.get(dependency) {
            return false;
        }
        match next {
            Some(value) => {
                self.publish(dependency, Some(&value));
                let _ = slots.insert(dependency.to_owned(), value);
            }
            None => {
                let _ = slots.remove(dependency);
                self.publish(dependency, None);
            }
        }
        true
    }

    /// Broadcast while the caller holds the slot lock.
    fn publish(&self, dependency: &str, value: Option<&T>) {
        let data = match value.map(serde_json::to_value).transpose() {
            Ok(data) => data,
            Err(e) => {
                warn!(key = ?self.key(), dependency, error = %e, "failed to serialize state value");
                return;
            }
        };
        if self.signal.core().publish(dependency, data).is_none() {
            debug!(dependency, "state changed before it was mounted");
        }
    }
}

impl<T: Serialize> State<T> {
    fn slot_json(&self, slots: &HashMap<String, T>, dependency: &str) -> Option<Value> {
        let value = slots.get(dependency)?;
        match serde_json::to_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key = ?self.key(), dependency, error = %e, "failed to serialize state value");
                None
            }
        }
    }
}

impl<T: Serialize + Send> StateSource for State<T> {
    fn current(&self, _connection: &Connection, dependency: &str) -> Option<Value> {
        let slots = self.slots.lock();
        self.slot_json(&slots, dependency)
    }

    /// Queued under the slot lock, so no broadcast can land before it with a
    /// newer value.
    fn push_current(&self, connection: &Connection, key: &str, dependency: &str) -> bool {
        let slots = self.slots.lock();
        self.slot_json(&slots, dependency)
            .is_some_and(|data| send_current(connection, key, data))
    }
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            slots: self.slots.clone(),
        }
    }
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("key", &self.key())
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_connection;
    use crate::websocket::registry::ConnectionRegistry;
    use proptest::prelude::*;
    use serde_json::json;
    use tokio::sync::mpsc::Receiver;

    fn mounted(key: &str) -> (State<i64>, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::default());
        let state = State::new();
        state.signal().core().bind(key, &registry).unwrap();
        (state, registry)
    }

    fn watcher(registry: &ConnectionRegistry, key: &str) -> (Arc<Connection>, Receiver<Arc<String>>) {
        let (conn, mut rx) = make_connection();
        registry.admit(conn.clone(), Arc::new("schema".into()));
        let _ = rx.try_recv();
        let _ = conn.watch(key);
        (conn, rx)
    }

    fn drain(rx: &mut Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn set_broadcasts_to_dependency_watchers_only() {
        let (state, registry) = mounted("room.count");
        let (_a, mut ra) = watcher(&registry, "room.count|A");
        let (_b, mut rb) = watcher(&registry, "room.count|B");

        assert!(state.set(10, "A"));

        assert_eq!(drain(&mut ra), vec![json!({"type": "update", "key": "room.count|A", "data": 10})]);
        assert!(drain(&mut rb).is_empty());
        assert_eq!(state.get("A"), Some(10));
        assert_eq!(state.get("B"), None);
    }

    #[test]
    fn equal_set_is_noop_but_force_set_emits() {
        let (state, registry) = mounted("room.count");
        let (_a, mut ra) = watcher(&registry, "room.count");

        assert!(state.set(5, ""));
        assert!(!state.set(5, ""));
        assert_eq!(drain(&mut ra).len(), 1);

        state.force_set(5, "");
        assert_eq!(drain(&mut ra).len(), 1);
    }

    #[test]
    fn delete_emits_no_value() {
        let (state, registry) = mounted("room.count");
        let (_a, mut ra) = watcher(&registry, "room.count|A");
        let _ = state.set(3, "A");
        let _ = drain(&mut ra);

        assert_eq!(state.delete("A"), Some(3));

        assert_eq!(drain(&mut ra), vec![json!({"type": "update", "key": "room.count|A"})]);
        assert_eq!(state.get("A"), None);
    }

    #[test]
    fn update_none_deletes_and_unchanged_is_noop() {
        let (state, registry) = mounted("room.count");
        let (_a, mut ra) = watcher(&registry, "room.count");
        let _ = state.set(1, "");
        let _ = drain(&mut ra);

        assert!(!state.update("", |prev| prev.copied()));
        assert!(drain(&mut ra).is_empty());

        assert!(state.update("", |prev| prev.map(|v| v + 1)));
        assert_eq!(state.get(""), Some(2));

        assert!(state.update("", |_| None));
        assert_eq!(state.get(""), None);
        assert_eq!(
            drain(&mut ra),
            vec![
                json!({"type": "update", "key": "room.count", "data": 2}),
                json!({"type": "update", "key": "room.count"}),
            ]
        );

        // nothing to delete, nothing to do
        assert!(!state.update("", |_| None));
    }

    #[test]
    fn with_initial_seeds_slots() {
        let state = State::with_initial([("", 1), ("A", 2)]);
        assert_eq!(state.get(""), Some(1));
        assert_eq!(state.get("A"), Some(2));
        assert_eq!(state.dependencies(), vec!["", "A"]);
    }

    #[test]
    fn unmounted_state_still_stores() {
        let state: State<String> = State::new();
        assert!(state.set("x".into(), ""));
        assert_eq!(state.get(""), Some("x".into()));
    }

    #[test]
    fn current_reads_slot_as_json() {
        let state = State::with_initial([("A", vec![1, 2])]);
        let (conn, _rx) = make_connection();
        assert_eq!(state.current(&conn, "A"), Some(json!([1, 2])));
        assert_eq!(state.current(&conn, "B"), None);
    }

    #[test]
    fn clones_share_slots() {
        let state: State<u8> = State::new();
        let other = state.clone();
        let _ = other.set(7, "");
        assert_eq!(state.get(""), Some(7));
    }

    proptest! {
        #[test]
        fn watchers_see_every_change_in_order(values in proptest::collection::vec(0i64..4, 1..32)) {
            let (state, registry) = mounted("n");
            let (_a, mut ra) = watcher(&registry, "n");

            let mut expected = Vec::new();
            let mut last = None;
            for v in values {
                let changed = state.set(v, "");
                prop_assert_eq!(changed, last != Some(v));
                if changed {
                    expected.push(json!(v));
                }
                last = Some(v);
            }

            let seen: Vec<Value> = drain(&mut ra).into_iter().map(|m| m["data"].clone()).collect();
            prop_assert_eq!(seen, expected);
            prop_assert_eq!(state.get(""), last);
        }
    }
}
