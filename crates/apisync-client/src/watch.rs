//! Watch table: ref-counted listeners per key plus the last-value cache.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tracing::{debug, error};

/// Untyped update callback. `None` means the slot has no value.
pub type Listener = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

struct Entry {
    id: u64,
    listener: Listener,
    wants_cache: bool,
}

#[derive(Default)]
struct Tables {
    listeners: HashMap<String, Vec<Entry>>,
    cache: HashMap<String, Value>,
}

/// Result of adding a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Registered {
    /// Handle for [`WatchTable::unregister`].
    pub id: u64,
    /// First listener on the key: the caller must send `on`.
    pub first: bool,
}

/// Listeners and cached values by full key.
///
/// Listeners always run outside the table lock, so a listener may subscribe,
/// unsubscribe or write the cache. A panicking listener is logged and the
/// remaining listeners still run.
///
/// Deliveries (dispatches and late-listener replays) are serialized by a
/// reentrant guard, so a listener never sees an older value after a newer one.
#[derive(Default)]
pub struct WatchTable {
    tables: Mutex<Tables>,
    delivery: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl WatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for `key`.
    ///
    /// A cache-wanting listener joining a key that already has listeners is
    /// replayed the cached value before this returns.
    pub fn register(&self, key: &str, listener: Listener, wants_cache: bool) -> Registered {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _delivery = self.delivery.lock();
        let (first, replay) = {
            let mut guard = self.tables.lock();
            let tables = &mut *guard;
            let list = tables.listeners.entry(key.to_owned()).or_default();
            list.push(Entry {
                id,
                listener: listener.clone(),
                wants_cache,
            });
            let first = list.len() == 1;
            let replay = if !first && wants_cache {
                tables.cache.get(key).cloned()
            } else {
                None
            };
            (first, replay)
        };

        if let Some(value) = replay {
            debug!(key, "replaying cached value to late listener");
            run(key, &listener, Some(&value));
        }
        Registered { id, first }
    }

    /// Remove listener `id` from `key`.
    ///
    /// Returns `true` when this removed the last listener: the caller must
    /// send `off`. Unknown ids return `false`.
    pub fn unregister(&self, key: &str, id: u64) -> bool {
        let mut tables = self.tables.lock();
        let Some(list) = tables.listeners.get_mut(key) else {
            return false;
        };
        let Some(index) = list.iter().position(|e| e.id == id) else {
            return false;
        };
        let _ = list.remove(index);
        if list.is_empty() {
            let _ = tables.listeners.remove(key);
            true
        } else {
            false
        }
    }

    /// Apply a server `update`: refresh the cache, then notify listeners.
    ///
    /// Returns the number of listeners notified.
    pub fn dispatch(&self, key: &str, data: Option<Value>) -> usize {
        let _delivery = self.delivery.lock();
        let listeners = {
            let mut tables = self.tables.lock();
            match &data {
                Some(value) => {
                    let _ = tables.cache.insert(key.to_owned(), value.clone());
                }
                None => {
                    let _ = tables.cache.remove(key);
                }
            }
            snapshot(&tables, key)
        };

        for listener in &listeners {
            run(key, listener, data.as_ref());
        }
        listeners.len()
    }

    /// Cached value of `key`.
    pub fn cache_get(&self, key: &str) -> Option<Value> {
        self.tables.lock().cache.get(key).cloned()
    }

    /// Overwrite the cached value locally and notify listeners. Nothing is
    /// sent to the server.
    pub fn cache_set(&self, key: &str, value: Value) -> usize {
        self.dispatch(key, Some(value))
    }

    /// Number of listeners on `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.tables.lock().listeners.get(key).map_or(0, Vec::len)
    }

    /// Keys with at least one listener, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.tables.lock().listeners.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn snapshot(tables: &Tables, key: &str) -> Vec<Listener> {
    tables
        .listeners
        .get(key)
        .map(|list| list.iter().map(|e| e.listener.clone()).collect())
        .unwrap_or_default()
}

fn run(key: &str, listener: &Listener, data: Option<&Value>) {
    if catch_unwind(AssertUnwindSafe(|| listener(data))).is_err() {
        error!(key, "update listener panicked");
    }
}
