//! Broadcast-only signals.

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use apisync_core::ServerMessage;
use apisync_core::key::full_key;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::errors::NamespaceError;
use crate::websocket::connection::Connection;
use crate::websocket::registry::ConnectionRegistry;

/// Key and fan-out target, assigned once at mount time.
struct Binding {
    key: String,
    connections: Arc<ConnectionRegistry>,
}

/// Untyped part of a signal shared by every clone.
#[derive(Default)]
pub(crate) struct SignalCore {
    binding: OnceLock<Binding>,
}

impl SignalCore {
    /// Assign the key. Fails if the signal is already mounted.
    pub(crate) fn bind(&self, key: &str, connections: &Arc<ConnectionRegistry>) -> Result<(), NamespaceError> {
        let binding = Binding {
            key: key.to_owned(),
            connections: connections.clone(),
        };
        self.binding.set(binding).map_err(|_| NamespaceError::AlreadyBound {
            path: key.to_owned(),
            existing: self.key().unwrap_or_default().to_owned(),
        })
    }

    pub(crate) fn key(&self) -> Option<&str> {
        self.binding.get().map(|b| b.key.as_str())
    }

    /// Fan `data` out to watchers of `key|dependency`.
    ///
    /// Returns `None` when the signal is not mounted yet.
    pub(crate) fn publish(&self, dependency: &str, data: Option<Value>) -> Option<usize> {
        let binding = self.binding.get()?;
        let key = full_key(&binding.key, dependency);
        Some(binding.connections.broadcast_update(&key, data))
    }
}

/// A keyed value pushed to watching connections. Nothing is stored.
///
/// Clones share the same key. Declare the signal, mount it in a
/// [`Namespace`](crate::Namespace), then call [`emit`](Self::emit) from
/// anywhere.
pub struct Signal<T> {
    core: Arc<SignalCore>,
    _marker: PhantomData<fn(&T)>,
}

impl<T> Signal<T> {
    /// Create an unmounted signal.
    pub fn new() -> Self {
        Self {
            core: Arc::new(SignalCore::default()),
            _marker: PhantomData,
        }
    }

    /// Dotted key, once mounted.
    pub fn key(&self) -> Option<&str> {
        self.core.key()
    }

    pub(crate) fn core(&self) -> &Arc<SignalCore> {
        &self.core
    }

    /// Send `update` with no value to watchers of `dependency`.
    pub fn emit_none(&self, dependency: &str) -> usize {
        self.publish_or_log(dependency, None)
    }

    fn publish_or_log(&self, dependency: &str, data: Option<Value>) -> usize {
        if let Some(sent) = self.core.publish(dependency, data) {
            sent
        } else {
            error!(dependency, "signal emitted before it was mounted");
            0
        }
    }
}

impl<T: Serialize> Signal<T> {
    /// Push `value` to every connection watching this key with `dependency`.
    ///
    /// Returns the number of connections the update was queued for.
    pub fn emit(&self, value: &T, dependency: &str) -> usize {
        match serde_json::to_value(value) {
            Ok(data) => self.publish_or_log(dependency, Some(data)),
            Err(e) => {
                error!(key = ?self.key(), dependency, error = %e, "failed to serialize signal value");
                0
            }
        }
    }

    /// Compute a payload per watching connection.
    ///
    /// `f` is called once for each connection watching `key|dependency`;
    /// returning `None` skips that connection.
    pub fn emit_each<F>(&self, dependency: &str, mut f: F) -> usize
    where
        F: FnMut(&Connection) -> Option<T>,
    {
        let Some(binding) = self.core.binding.get() else {
            error!(dependency, "signal emitted before it was mounted");
            return 0;
        };
        let key = full_key(&binding.key, dependency);

        let mut sent = 0;
        for conn in binding.connections.watchers(&key) {
            let Some(value) = f(&conn) else { continue };
            let data = match serde_json::to_value(&value) {
                Ok(data) => data,
                Err(e) => {
                    warn!(conn_id = %conn.id, key, error = %e, "failed to serialize signal value");
                    continue;
                }
            };
            let message = ServerMessage::Update {
                key: key.clone(),
                data: Some(data),
            };
            if conn.send_message(&message) {
                sent += 1;
            }
        }
        debug!(key, recipients = sent, "per-connection broadcast");
        sent
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("key", &self.key()).finish()
    }
}
