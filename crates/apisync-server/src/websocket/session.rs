//! WebSocket session lifecycle, from upgrade through removal.

use std::sync::Arc;
use std::time::Duration;

use apisync_core::ConnectionId;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::connection::Connection;
use super::handler::handle_message;
use super::registry::LeaveReason;
use crate::engine::Engine;
use crate::metrics::WS_CONNECTIONS_TOTAL;

/// How long the writer may take to flush and close after the session ends.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Run a WebSocket session for a connected peer.
///
/// 1. Registers the connection and queues the schema
/// 2. Forwards queued frames to the socket until terminated
/// 3. Handles inbound frames until the peer closes or the connection is evicted
/// 4. Removes the connection through the registry's single eviction path
#[instrument(skip_all, fields(conn_id = %id))]
pub async fn run_ws_session(ws: WebSocket, id: ConnectionId, engine: Arc<Engine>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(engine.config.send_queue_capacity.max(1));
    let connection = Arc::new(Connection::new(id.clone(), send_tx));
    let terminated = connection.termination_token();

    // Outbound forwarder. Closes the socket once the connection is terminated.
    let outbound_token = terminated.clone();
    let mut outbound = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(frame) = msg else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_token.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    engine.connections.admit(connection.clone(), engine.schema_frame().clone());

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = terminated.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };

        match msg {
            Message::Text(text) => {
                let _ = handle_message(text.as_str(), &connection, &engine);
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    let _ = handle_message(text, &connection, &engine);
                }
                Err(_) => debug!(len = data.len(), "received non-UTF8 binary frame"),
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            // Transport-level pong also counts as liveness
            Message::Pong(_) => connection.mark_alive(),
            Message::Ping(_) => {}
        }
    }

    let _ = engine.connections.evict(&id, LeaveReason::Closed);

    if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }
    info!(dropped = connection.drop_count(), "client disconnected");
}
