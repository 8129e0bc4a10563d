//! Inbound frame handling: decode, then route by message type.

use std::sync::Arc;

use apisync_core::{ClientMessage, EnvelopeError, Key, ServerMessage};
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::connection::Connection;
use crate::engine::Engine;
use crate::metrics::WS_DECODE_ERRORS_TOTAL;
use crate::procedure::CallContext;

/// What an inbound frame did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handled {
    /// Liveness answer recorded.
    Pong,
    /// Key added to the watch set; `pushed` if a current value was sent.
    Watch {
        /// Full key.
        key: String,
        /// Whether a current value was queued.
        pushed: bool,
    },
    /// Key removed from the watch set.
    Unwatch {
        /// Full key.
        key: String,
        /// Whether the key was watched.
        removed: bool,
    },
    /// Procedure call started in the background.
    Call {
        /// Correlation id.
        key: String,
    },
    /// Frame could not be decoded and was dropped.
    Dropped,
}

/// Handle one text frame from `connection`.
///
/// Malformed frames are logged and dropped; the connection stays open.
/// Calls run on their own task so a slow procedure never blocks the read loop.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub fn handle_message(text: &str, connection: &Arc<Connection>, engine: &Arc<Engine>) -> Handled {
    let message = match ClientMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, len = text.len(), "dropping invalid frame");
            counter!(WS_DECODE_ERRORS_TOTAL, "reason" => decode_reason(&e)).increment(1);
            return Handled::Dropped;
        }
    };

    match message {
        ClientMessage::Pong => {
            connection.mark_alive();
            Handled::Pong
        }
        ClientMessage::On { key } => {
            // `k|` and `k` name the same slot
            let parsed = Key::parse(&key);
            let key = parsed.to_string();
            let _ = connection.watch(&key);
            let pushed = engine.states.push_current(connection, &parsed);
            debug!(key, pushed, "watch");
            Handled::Watch { key, pushed }
        }
        ClientMessage::Off { key } => {
            let key = Key::parse(&key).to_string();
            let removed = connection.unwatch(&key);
            debug!(key, removed, "unwatch");
            Handled::Unwatch { key, removed }
        }
        ClientMessage::FunctionCall { key, data } => {
            let connection = connection.clone();
            let engine = engine.clone();
            let request_key = key.clone();
            let _ = tokio::spawn(async move {
                let ctx = CallContext::new(connection.clone());
                let response = engine.dispatcher.dispatch(ctx, data).await;
                let message = ServerMessage::FunctionResponse {
                    key: request_key,
                    data: response,
                };
                if !connection.send_message(&message) {
                    debug!(conn_id = %connection.id, "response not delivered, connection gone or saturated");
                }
            });
            Handled::Call { key }
        }
    }
}

fn decode_reason(error: &EnvelopeError) -> &'static str {
    match error {
        EnvelopeError::Json(_) => "json",
        EnvelopeError::MissingType => "missing_type",
        EnvelopeError::UnknownType(_) => "unknown_type",
        EnvelopeError::MissingKey { .. } => "missing_key",
        EnvelopeError::MissingData { .. } => "missing_data",
        EnvelopeError::InvalidData { .. } => "invalid_data",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::errors::ProcedureError;
    use crate::hooks::NoopHooks;
    use crate::namespace::Namespace;
    use crate::procedure::CallArgs;
    use crate::state::State;
    use crate::websocket::connection::tests::make_connection;
    use apisync_core::ConnectionId;
    use serde_json::{Value, json};
    use tokio::sync::mpsc::{self, Receiver};

    async fn add(_ctx: CallContext, args: CallArgs) -> Result<Value, ProcedureError> {
        let a: i64 = args.get(0)?;
        let b: i64 = args.get(1)?;
        Ok(json!(a + b))
    }

    fn engine(count: &State<u32>) -> Arc<Engine> {
        let ns = Namespace::new()
            .nest("math", Namespace::new().procedure("add", add))
            .nest("room", Namespace::new().state("count", count));
        Arc::new(Engine::new(ServerConfig::default(), ns, Arc::new(NoopHooks)).unwrap())
    }

    fn decode(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    fn joined(engine: &Arc<Engine>) -> (Arc<Connection>, Receiver<Arc<String>>) {
        let (conn, mut rx) = make_connection();
        engine.connections.admit(conn.clone(), engine.schema_frame().clone());
        let _ = rx.try_recv();
        (conn, rx)
    }

    #[tokio::test]
    async fn on_pushes_current_value() {
        let count = State::with_initial([("A", 4u32)]);
        let engine = engine(&count);
        let (conn, mut rx) = joined(&engine);

        let handled = handle_message(r#"{"type":"on","key":"room.count|A"}"#, &conn, &engine);

        assert_eq!(handled, Handled::Watch { key: "room.count|A".into(), pushed: true });
        assert!(conn.is_watching("room.count|A"));
        assert_eq!(
            decode(&rx.try_recv().unwrap()),
            json!({"type": "update", "key": "room.count|A", "data": 4})
        );
    }

    #[tokio::test]
    async fn on_without_value_pushes_nothing() {
        let count: State<u32> = State::new();
        let engine = engine(&count);
        let (conn, mut rx) = joined(&engine);

        let handled = handle_message(r#"{"type":"on","key":"room.count"}"#, &conn, &engine);
        assert_eq!(handled, Handled::Watch { key: "room.count".into(), pushed: false });
        assert!(rx.try_recv().is_err());

        // later mutations still arrive
        let _ = count.set(1, "");
        assert_eq!(decode(&rx.try_recv().unwrap())["data"], json!(1));
    }

    #[tokio::test]
    async fn off_stops_updates() {
        let count: State<u32> = State::new();
        let engine = engine(&count);
        let (conn, mut rx) = joined(&engine);

        let _ = handle_message(r#"{"type":"on","key":"room.count"}"#, &conn, &engine);
        let handled = handle_message(r#"{"type":"off","key":"room.count"}"#, &conn, &engine);
        assert_eq!(handled, Handled::Unwatch { key: "room.count".into(), removed: true });

        let _ = count.set(9, "");
        assert!(rx.try_recv().is_err());

        let again = handle_message(r#"{"type":"off","key":"room.count"}"#, &conn, &engine);
        assert_eq!(again, Handled::Unwatch { key: "room.count".into(), removed: false });
    }

    #[tokio::test]
    async fn empty_dependency_suffix_names_the_default_slot() {
        let count = State::with_initial([("", 2u32)]);
        let engine = engine(&count);
        let (conn, mut rx) = joined(&engine);

        let handled = handle_message(r#"{"type":"on","key":"room.count|"}"#, &conn, &engine);
        assert_eq!(handled, Handled::Watch { key: "room.count".into(), pushed: true });
        assert_eq!(decode(&rx.try_recv().unwrap())["key"], json!("room.count"));

        let _ = count.set(3, "");
        assert_eq!(
            decode(&rx.try_recv().unwrap()),
            json!({"type": "update", "key": "room.count", "data": 3})
        );

        let handled = handle_message(r#"{"type":"off","key":"room.count|"}"#, &conn, &engine);
        assert_eq!(handled, Handled::Unwatch { key: "room.count".into(), removed: true });
    }

    #[test]
    fn current_value_push_never_lands_after_a_newer_update() {
        const WRITES: u32 = 500;
        let count: State<u32> = State::new();
        let engine = engine(&count);

        for round in 0..20 {
            let (tx, mut rx) = mpsc::channel(WRITES as usize + 8);
            let conn = Arc::new(Connection::new(ConnectionId::new(), tx));
            engine.connections.admit(conn.clone(), engine.schema_frame().clone());
            let _ = rx.try_recv();

            let base = round * WRITES;
            std::thread::scope(|scope| {
                let writer = count.clone();
                let _ = scope.spawn(move || {
                    for n in 1..=WRITES {
                        let _ = writer.set(base + n, "");
                    }
                });
                let _ = handle_message(r#"{"type":"on","key":"room.count"}"#, &conn, &engine);
            });
            let _ = conn.unwatch("room.count");

            let mut values = Vec::new();
            while let Ok(frame) = rx.try_recv() {
                values.push(decode(&frame)["data"].as_u64().unwrap());
            }
            assert!(values.windows(2).all(|w| w[0] <= w[1]), "out of order: {values:?}");
            assert_eq!(values.last(), Some(&u64::from(base + WRITES)));
        }
    }

    #[tokio::test]
    async fn pong_marks_alive() {
        let count: State<u32> = State::new();
        let engine = engine(&count);
        let (conn, _rx) = joined(&engine);
        let _ = conn.check_alive();
        let _ = conn.record_missed_pong();

        assert_eq!(handle_message(r#"{"type":"pong"}"#, &conn, &engine), Handled::Pong);
        assert!(conn.is_alive());
        assert_eq!(conn.missed_pongs(), 0);
    }

    #[tokio::test]
    async fn function_call_answers_with_same_key() {
        let count: State<u32> = State::new();
        let engine = engine(&count);
        let (conn, mut rx) = joined(&engine);

        let handled = handle_message(
            r#"{"type":"function-call","key":"r1","data":{"path":"math.add","params":[2,3]}}"#,
            &conn,
            &engine,
        );
        assert_eq!(handled, Handled::Call { key: "r1".into() });

        let frame = decode(&rx.recv().await.unwrap());
        assert_eq!(
            frame,
            json!({"type": "function-response", "key": "r1", "data": {"status": "success", "result": 5}})
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let count: State<u32> = State::new();
        let engine = engine(&count);
        let (conn, mut rx) = joined(&engine);

        for frame in [
            "not json",
            r#"{"key":"x"}"#,
            r#"{"type":"explode"}"#,
            r#"{"type":"on"}"#,
            r#"{"type":"function-call","key":"r1"}"#,
            r#"{"type":"function-call","key":"r1","data":{"params":[]}}"#,
        ] {
            assert_eq!(handle_message(frame, &conn, &engine), Handled::Dropped, "{frame}");
        }
        assert!(rx.try_recv().is_err());
        assert!(conn.watched().is_empty());
    }
}
