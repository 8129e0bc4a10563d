//! `SyncClient`: one WebSocket connection to a sync server.

use std::sync::Arc;

use apisync_core::key::full_key;
use apisync_core::{ClientMessage, FunctionCall, LeafKind, RequestId, Schema, ServerMessage};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::errors::{CallError, ClientError};
use crate::handles::Subscription;
use crate::path::ApiPath;
use crate::pending::PendingCalls;
use crate::watch::{Listener, WatchTable};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between client handles and the connection task.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) pending: PendingCalls,
    pub(crate) watch: WatchTable,
    schema: RwLock<Schema>,
    connected: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl Shared {
    fn new(config: ClientConfig, schema: Schema) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (connected, _) = watch::channel(true);
        let shared = Self {
            config,
            pending: PendingCalls::new(),
            watch: WatchTable::new(),
            schema: RwLock::new(schema),
            connected,
            outbound,
            shutdown: CancellationToken::new(),
        };
        (shared, rx)
    }

    /// Queue a frame in send order. Returns `false` once the connection is gone.
    fn send(&self, message: &ClientMessage) -> bool {
        match message.encode() {
            Ok(json) => self.outbound.send(json).is_ok(),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to encode message");
                false
            }
        }
    }

    pub(crate) fn handle_frame(&self, text: &str) {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping invalid frame");
                return;
            }
        };
        match message {
            ServerMessage::Ping => {
                let _ = self.send(&ClientMessage::Pong);
            }
            ServerMessage::Update { key, data } => {
                let notified = self.watch.dispatch(&key, data);
                debug!(key, notified, "update");
            }
            ServerMessage::FunctionResponse { key, data } => {
                if !self.pending.resolve(&key, data) {
                    debug!(request_id = key, "response for unknown or settled call");
                }
            }
            ServerMessage::Schema { data } => {
                debug!(leaves = data.len(), "schema replaced");
                *self.schema.write() = data;
            }
        }
    }

    pub(crate) fn mark_disconnected(&self) {
        let _ = self.connected.send_replace(false);
        let rejected = self.pending.reject_all();
        if rejected > 0 {
            warn!(rejected, "connection lost with calls in flight");
        }
    }
}

/// Closes the connection when the last client handle is dropped.
struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// A connected client. Cheap to clone; clones share the connection.
///
/// There is no automatic reconnect: once disconnected, calls fail with
/// [`CallError::Disconnected`] and a new client must be created.
#[derive(Clone)]
pub struct SyncClient {
    owner: Arc<Owner>,
}

impl SyncClient {
    /// Connect and wait for the server's `schema` frame.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let limit = config.connect_timeout();
        let (mut ws, _) = tokio::time::timeout(limit, connect_async(config.url.as_str()))
            .await
            .map_err(|_| ClientError::Timeout(limit))?
            .map_err(Box::new)?;

        let schema = tokio::time::timeout(limit, read_schema(&mut ws))
            .await
            .map_err(|_| ClientError::Timeout(limit))??;
        info!(leaves = schema.len(), "connected");

        let (shared, outbound_rx) = Shared::new(config, schema);
        let shared = Arc::new(shared);
        let _task = tokio::spawn(run_connection(ws, outbound_rx, shared.clone()));
        Ok(Self::from_shared(shared))
    }

    fn from_shared(shared: Arc<Shared>) -> Self {
        Self {
            owner: Arc::new(Owner { shared }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.owner.shared
    }

    /// Root of the remote namespace.
    pub fn api(&self) -> ApiPath {
        ApiPath::new(self.clone(), String::new())
    }

    /// Handle for a dotted path.
    pub fn path(&self, path: &str) -> ApiPath {
        ApiPath::new(self.clone(), path.to_owned())
    }

    /// Last schema received from the server.
    pub fn schema(&self) -> Schema {
        self.shared().schema.read().clone()
    }

    /// Whether the connection is open.
    pub fn is_connected(&self) -> bool {
        *self.shared().connected.borrow()
    }

    /// Connectivity as a watch channel; flips to `false` once, on disconnect.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.shared().connected.subscribe()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.connectivity();
        let _ = rx.wait_for(|connected| !*connected).await;
    }

    /// Close the connection and wait for it to shut down.
    pub async fn close(&self) {
        self.shared().shutdown.cancel();
        self.closed().await;
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.shared().pending.len()
    }

    /// Call the procedure at `path`.
    ///
    /// Resolves with the procedure result, the server's error, or
    /// [`CallError::Timeout`] after the configured call timeout.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn call(&self, path: &str, params: Vec<Value>) -> Result<Value, CallError> {
        self.check_callable(path)?;
        let shared = self.shared();

        let request_id = RequestId::for_path(path);
        let rx = shared.pending.insert(request_id.as_str());
        let message = ClientMessage::FunctionCall {
            key: request_id.as_str().to_owned(),
            data: FunctionCall {
                path: path.to_owned(),
                params,
            },
        };
        if !self.is_connected() || !shared.send(&message) {
            let _ = shared.pending.remove(request_id.as_str());
            return Err(CallError::Disconnected);
        }
        debug!(request_id = %request_id, "call sent");

        let timeout = shared.config.call_timeout();
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CallError::Disconnected),
            Err(_) => {
                let _ = shared.pending.remove(request_id.as_str());
                warn!(request_id = %request_id, ?timeout, "call timed out");
                return Err(CallError::Timeout {
                    path: path.to_owned(),
                    timeout,
                });
            }
        };

        if response.is_success() {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(CallError::Remote {
                code: response.code.unwrap_or_default(),
                message: response.error.unwrap_or_default(),
            })
        }
    }

    fn check_callable(&self, path: &str) -> Result<(), CallError> {
        if !self.shared().config.strict_paths {
            return Ok(());
        }
        match self.lookup(path) {
            Some(LeafKind::Function) => Ok(()),
            Some(kind) => Err(CallError::NotCallable {
                path: path.to_owned(),
                kind: kind.as_str(),
            }),
            None if self.is_namespace(path) => Err(CallError::NotCallable {
                path: path.to_owned(),
                kind: "namespace",
            }),
            None => Err(CallError::UnknownPath { path: path.to_owned() }),
        }
    }

    /// Check `path` before subscribing. `state_only` additionally rejects signals.
    pub(crate) fn check_subscribable(&self, path: &str, state_only: bool) -> Result<(), ClientError> {
        if !self.shared().config.strict_paths {
            return Ok(());
        }
        match self.lookup(path) {
            Some(LeafKind::State) => Ok(()),
            Some(LeafKind::Signal) if !state_only => Ok(()),
            Some(kind @ LeafKind::Signal) => Err(ClientError::NotAState {
                path: path.to_owned(),
                kind: kind.as_str(),
            }),
            Some(kind) => Err(ClientError::NotSubscribable {
                path: path.to_owned(),
                kind: kind.as_str(),
            }),
            None => Err(ClientError::UnknownPath { path: path.to_owned() }),
        }
    }

    fn lookup(&self, path: &str) -> Option<LeafKind> {
        self.shared().schema.read().kind(path)
    }

    fn is_namespace(&self, path: &str) -> bool {
        let prefix = format!("{path}.");
        !path.is_empty() && self.shared().schema.read().iter().any(|(p, _)| p.starts_with(&prefix))
    }

    /// Add a listener for `path|dependency`, sending `on` for the first one.
    pub(crate) fn add_listener(&self, path: &str, dependency: &str, listener: Listener, wants_cache: bool) -> Subscription {
        let key = full_key(path, dependency);
        let shared = self.shared();
        let registered = shared.watch.register(&key, listener, wants_cache);
        if registered.first {
            debug!(key, "watch on");
            if !shared.send(&ClientMessage::On { key: key.clone() }) {
                warn!(key, "watch registered while disconnected");
            }
        }
        Subscription::new(self.clone(), key, registered.id)
    }

    /// Remove a listener, sending `off` after the last one.
    pub(crate) fn remove_listener(&self, key: &str, id: u64) {
        let shared = self.shared();
        if shared.watch.unregister(key, id) {
            debug!(key, "watch off");
            let _ = shared.send(&ClientMessage::Off { key: key.to_owned() });
        }
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared();
        f.debug_struct("SyncClient")
            .field("url", &shared.config.url)
            .field("connected", &self.is_connected())
            .field("pending_calls", &shared.pending.len())
            .field("watched", &shared.watch.keys())
            .finish()
    }
}

/// Read frames until the opening `schema`.
async fn read_schema(ws: &mut WsStream) -> Result<Schema, ClientError> {
    loop {
        let msg = match ws.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(ClientError::Connect(Box::new(e))),
            None => return Err(ClientError::Handshake("connection closed before schema".into())),
        };
        let text = match msg {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            Message::Close(_) => return Err(ClientError::Handshake("connection closed before schema".into())),
            _ => continue,
        };
        return match ServerMessage::decode(&text) {
            Ok(ServerMessage::Schema { data }) => Ok(data),
            Ok(other) => Err(ClientError::Handshake(format!("expected schema, got '{}'", other.kind()))),
            Err(e) => Err(ClientError::Handshake(e.to_string())),
        };
    }
}

/// Pump frames both ways until either side closes or the client shuts down.
async fn run_connection(ws: WsStream, mut outbound: mpsc::UnboundedReceiver<String>, shared: Arc<Shared>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => shared.handle_frame(text.as_str()),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => shared.handle_frame(text),
                        Err(_) => debug!(len = data.len(), "received non-UTF8 binary frame"),
                    },
                    Message::Close(_) => {
                        debug!("server sent close frame");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    shared.mark_disconnected();
    info!("disconnected");
}
