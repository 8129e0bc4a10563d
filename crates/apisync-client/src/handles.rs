//! Typed subscription handles for signals and states.

use std::marker::PhantomData;
use std::sync::Arc;

use apisync_core::key::full_key;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::client::SyncClient;
use crate::errors::ClientError;
use crate::watch::Listener;

/// An active listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    client: SyncClient,
    key: String,
    id: u64,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(client: SyncClient, key: String, id: u64) -> Self {
        Self {
            client,
            key,
            id,
            active: true,
        }
    }

    /// Full key this subscription listens on.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.active) {
            self.client.remove_listener(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish()
    }
}

fn decode<T: DeserializeOwned>(key: &str, data: Option<&Value>) -> Result<Option<T>, ()> {
    match data.map(|v| serde_json::from_value(v.clone())).transpose() {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(key, error = %e, "failed to decode update");
            Err(())
        }
    }
}

fn typed_listener<T, F>(key: String, callback: F) -> Listener
where
    T: DeserializeOwned,
    F: Fn(Option<T>) + Send + Sync + 'static,
{
    Arc::new(move |data: Option<&Value>| {
        if let Ok(value) = decode(&key, data) {
            callback(value);
        }
    })
}

/// Subscription handle for a signal. `None` means the update carried no value.
pub struct SignalHandle<T> {
    client: SyncClient,
    path: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SignalHandle<T> {
    pub(crate) fn new(client: SyncClient, path: String) -> Self {
        Self {
            client,
            path,
            _marker: PhantomData,
        }
    }

    /// Dotted path of the signal.
    pub fn key(&self) -> &str {
        &self.path
    }
}

impl<T: DeserializeOwned + 'static> SignalHandle<T> {
    /// Run `callback` on every update for `dependency` until the returned
    /// subscription is dropped.
    pub fn subscribe<F>(&self, callback: F, dependency: &str) -> Subscription
    where
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        let listener = typed_listener(full_key(&self.path, dependency), callback);
        self.client.add_listener(&self.path, dependency, listener, false)
    }
}

impl<T> Clone for SignalHandle<T> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone(), self.path.clone())
    }
}

impl<T> std::fmt::Debug for SignalHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHandle").field("path", &self.path).finish()
    }
}

/// Subscription, cache and reactive-read handle for a state.
pub struct StateHandle<T> {
    signal: SignalHandle<T>,
}

impl<T> StateHandle<T> {
    pub(crate) fn new(client: SyncClient, path: String) -> Self {
        Self {
            signal: SignalHandle::new(client, path),
        }
    }

    /// Dotted path of the state.
    pub fn key(&self) -> &str {
        self.signal.key()
    }

    fn client(&self) -> &SyncClient {
        &self.signal.client
    }
}

impl<T: DeserializeOwned + 'static> StateHandle<T> {
    /// Run `callback` on every update for `dependency`.
    pub fn subscribe<F>(&self, callback: F, dependency: &str) -> Subscription
    where
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        self.signal.subscribe(callback, dependency)
    }

    /// Last known value for `dependency`, without a round trip.
    pub fn cache_get(&self, dependency: &str) -> Option<T> {
        let key = full_key(self.key(), dependency);
        let value = self.client().shared().watch.cache_get(&key);
        decode(&key, value.as_ref()).ok().flatten()
    }
}

impl<T: Serialize> StateHandle<T> {
    /// Optimistically overwrite the local value and notify local listeners.
    /// Nothing is sent to the server.
    pub fn cache_set(&self, value: &T, dependency: &str) -> Result<(), ClientError> {
        let key = full_key(self.key(), dependency);
        let value = serde_json::to_value(value)?;
        let _ = self.client().shared().watch.cache_set(&key, value);
        Ok(())
    }
}

impl<T> StateHandle<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Reactive read of `dependency`.
    ///
    /// Fails if the client is disconnected. Otherwise registers a
    /// cache-wanting listener feeding a watch channel. The first listener on
    /// the key starts empty and waits for the server's push; a later one is
    /// replayed the cached value before this returns.
    pub fn watch(&self, dependency: &str) -> Result<SyncedValue<T>, ClientError> {
        if !self.client().is_connected() {
            return Err(ClientError::Disconnected);
        }
        let (tx, rx) = watch::channel(None);
        let key = full_key(self.key(), dependency);
        let listener = typed_listener(key, move |value: Option<T>| {
            let _ = tx.send_replace(value);
        });
        let subscription = self.client().add_listener(self.key(), dependency, listener, true);
        Ok(SyncedValue {
            rx,
            subscription,
        })
    }
}

impl<T> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T> std::fmt::Debug for StateHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandle").field("path", &self.key()).finish()
    }
}

/// A state value kept current by server updates. Dropping it unsubscribes.
pub struct SyncedValue<T> {
    rx: watch::Receiver<Option<T>>,
    subscription: Subscription,
}

impl<T> SyncedValue<T> {
    /// Current value.
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.rx.borrow().clone()
    }

    /// Wait for the next change. Returns `false` if the listener is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Wait until `f` holds for the current value and return a copy of it.
    pub async fn wait_for<F>(&mut self, mut f: F) -> Option<Option<T>>
    where
        T: Clone,
        F: FnMut(&Option<T>) -> bool,
    {
        self.rx.wait_for(|v| f(v)).await.ok().map(|v| (*v).clone())
    }

    /// A receiver for use in `select!` or other tasks.
    pub fn receiver(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }
}

impl<T> std::fmt::Debug for SyncedValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedValue")
            .field("key", &self.subscription.key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{demo_schema, detached, sent};
    use crate::config::ClientConfig;
    use apisync_core::ServerMessage;
    use parking_lot::Mutex;
    use serde_json::json;

    fn update(key: &str, data: Option<Value>) -> String {
        ServerMessage::Update { key: key.into(), data }.encode().unwrap()
    }

    #[test]
    fn subscribe_sends_on_once_and_off_once() {
        let (client, mut rx) = detached(demo_schema(), ClientConfig::default());
        let count = client.path("room.count").state::<u32>().unwrap();

        let a = count.subscribe(|_| {}, "A");
        let b = count.subscribe(|_| {}, "A");
        assert_eq!(sent(&mut rx), vec![json!({"type": "on", "key": "room.count|A"})]);

        drop(a);
        assert!(sent(&mut rx).is_empty());
        b.unsubscribe();
        assert_eq!(sent(&mut rx), vec![json!({"type": "off", "key": "room.count|A"})]);
    }

    #[test]
    fn updates_are_decoded_per_key() {
        let (client, _rx) = detached(demo_schema(), ClientConfig::default());
        let message = client.path("chat.message").signal::<String>().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = message.subscribe(move |v| sink.lock().push(v), "lobby");

        client.shared().handle_frame(&update("chat.message|lobby", Some(json!("hi"))));
        client.shared().handle_frame(&update("chat.message", Some(json!("elsewhere"))));
        client.shared().handle_frame(&update("chat.message|lobby", None));
        // wrong type is logged and skipped
        client.shared().handle_frame(&update("chat.message|lobby", Some(json!(5))));

        assert_eq!(*seen.lock(), vec![Some("hi".to_string()), None]);
    }

    #[test]
    fn late_watcher_gets_cached_value_immediately() {
        let (client, _rx) = detached(demo_schema(), ClientConfig::default());
        let count = client.path("room.count").state::<u32>().unwrap();

        let _first = count.subscribe(|_| {}, "");
        client.shared().handle_frame(&update("room.count", Some(json!(7))));

        let synced = count.watch("").unwrap();
        assert_eq!(synced.get(), Some(7));
        assert_eq!(count.cache_get(""), Some(7));
    }

    #[test]
    fn first_watcher_ignores_cache_left_by_earlier_listeners() {
        let (client, mut rx) = detached(demo_schema(), ClientConfig::default());
        let count = client.path("room.count").state::<u32>().unwrap();

        let earlier = count.subscribe(|_| {}, "");
        client.shared().handle_frame(&update("room.count", Some(json!(7))));
        drop(earlier);
        let _ = sent(&mut rx);

        // the server may have deleted the slot meanwhile and will push nothing
        let synced = count.watch("").unwrap();
        assert_eq!(sent(&mut rx), vec![json!({"type": "on", "key": "room.count"})]);
        assert_eq!(synced.get(), None);
        assert_eq!(count.cache_get(""), Some(7));
    }

    #[tokio::test]
    async fn synced_value_follows_updates() {
        let (client, mut rx) = detached(demo_schema(), ClientConfig::default());
        let count = client.path("room.count").state::<u32>().unwrap();

        let mut synced = count.watch("A").unwrap();
        assert_eq!(synced.get(), None);
        assert_eq!(sent(&mut rx), vec![json!({"type": "on", "key": "room.count|A"})]);

        client.shared().handle_frame(&update("room.count|A", Some(json!(3))));
        assert!(synced.changed().await);
        assert_eq!(synced.get(), Some(3));

        drop(synced);
        assert_eq!(sent(&mut rx), vec![json!({"type": "off", "key": "room.count|A"})]);
    }

    #[test]
    fn cache_set_notifies_local_listeners_without_sending() {
        let (client, mut rx) = detached(demo_schema(), ClientConfig::default());
        let count = client.path("room.count").state::<u32>().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = count.subscribe(move |v| sink.lock().push(v), "");
        let _ = sent(&mut rx);

        count.cache_set(&42, "").unwrap();

        assert_eq!(*seen.lock(), vec![Some(42)]);
        assert_eq!(count.cache_get(""), Some(42));
        assert!(sent(&mut rx).is_empty());
    }

    #[test]
    fn watch_fails_when_disconnected() {
        let (client, _rx) = detached(demo_schema(), ClientConfig::default());
        client.shared().mark_disconnected();
        let count = client.path("room.count").state::<u32>().unwrap();
        assert!(matches!(count.watch(""), Err(ClientError::Disconnected)));
    }
}
