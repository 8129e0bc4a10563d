//! Demo namespace served by `apisync serve`.
//!
//! ```text
//! math.add(a, b)            -> a + b
//! room.join(room)           -> members after joining; updates room.count|<room>
//! room.leave(room)          -> members after leaving; the slot is deleted at zero
//! room.count                state, one slot per room
//! chat.send(room, text)     -> watchers reached; emits chat.message|<room>
//! chat.message              signal
//! presence.online           state, connections currently open
//! presence.whoami()         -> caller's connection id
//! ```

use std::sync::Arc;

use apisync_server::{
    CallArgs, CallContext, Connection, LifecycleHooks, Namespace, ProcedureError, Signal, State,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

/// A chat line broadcast on `chat.message`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Connection id of the sender.
    pub from: String,
    /// Message body.
    pub text: String,
}

/// Values shared between the demo procedures and hooks.
#[derive(Clone, Default)]
pub struct Demo {
    rooms: State<u64>,
    online: State<u64>,
    chat: Signal<ChatMessage>,
}

impl Demo {
    /// Fresh demo values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the namespace. Mount it once.
    pub fn namespace(&self) -> Namespace {
        let rooms = self.rooms.clone();
        let join = move |_ctx: CallContext, args: CallArgs| {
            let rooms = rooms.clone();
            async move {
                let room = room_arg(&args)?;
                Ok::<_, ProcedureError>(json!(join_room(&rooms, &room)))
            }
        };

        let rooms = self.rooms.clone();
        let leave = move |_ctx: CallContext, args: CallArgs| {
            let rooms = rooms.clone();
            async move {
                let room = room_arg(&args)?;
                Ok::<_, ProcedureError>(json!(leave_room(&rooms, &room)))
            }
        };

        let chat = self.chat.clone();
        let send = move |ctx: CallContext, args: CallArgs| {
            let chat = chat.clone();
            async move {
                let room = room_arg(&args)?;
                let text: String = args.get(1)?;
                if text.trim().is_empty() {
                    return Err(ProcedureError::custom("EMPTY_MESSAGE", "message text is empty"));
                }
                let message = ChatMessage {
                    from: ctx.connection_id().to_string(),
                    text,
                };
                Ok::<_, ProcedureError>(json!(chat.emit(&message, &room)))
            }
        };

        Namespace::new()
            .nest("math", Namespace::new().procedure("add", add))
            .nest(
                "room",
                Namespace::new()
                    .state("count", &self.rooms)
                    .procedure("join", join)
                    .procedure("leave", leave),
            )
            .nest(
                "chat",
                Namespace::new().signal("message", &self.chat).procedure("send", send),
            )
            .nest(
                "presence",
                Namespace::new()
                    .state("online", &self.online)
                    .procedure("whoami", whoami),
            )
    }

    /// Hooks that keep `presence.online` current.
    pub fn hooks(&self) -> Arc<dyn LifecycleHooks> {
        Arc::new(PresenceHooks {
            online: self.online.clone(),
        })
    }
}

/// Members after joining, as counted under the slot lock.
fn join_room(rooms: &State<u64>, room: &str) -> u64 {
    let mut members = 0;
    let _ = rooms.update(room, |n| {
        members = n.copied().unwrap_or(0) + 1;
        Some(members)
    });
    members
}

/// Members after leaving. The slot is deleted when the last member leaves.
fn leave_room(rooms: &State<u64>, room: &str) -> u64 {
    let mut members = 0;
    let _ = rooms.update(room, |n| {
        members = n.copied().unwrap_or(0).saturating_sub(1);
        (members > 0).then_some(members)
    });
    members
}

fn room_arg(args: &CallArgs) -> Result<String, ProcedureError> {
    let room: String = args.get(0)?;
    if room.contains(apisync_core::key::DEPENDENCY_SEPARATOR) {
        return Err(ProcedureError::invalid_params("room name may not contain '|'"));
    }
    Ok(room)
}

async fn add(_ctx: CallContext, args: CallArgs) -> Result<Value, ProcedureError> {
    let a: f64 = args.get(0)?;
    let b: f64 = args.get(1)?;
    Ok(json!(a + b))
}

async fn whoami(ctx: CallContext, _args: CallArgs) -> Result<Value, ProcedureError> {
    Ok(json!(ctx.connection_id().as_str()))
}

struct PresenceHooks {
    online: State<u64>,
}

impl LifecycleHooks for PresenceHooks {
    fn on_join(&self, connection: &Connection) {
        let _ = self.online.update("", |n| Some(n.copied().unwrap_or(0) + 1));
        info!(conn_id = %connection.id, "client joined");
    }

    fn on_after_leave(&self, connection: &Connection) {
        let _ = self.online.update("", |n| Some(n.copied().unwrap_or(1).saturating_sub(1)));
        info!(conn_id = %connection.id, "client left");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apisync_client::{ClientConfig, SyncClient};
    use apisync_core::LeafKind;
    use apisync_server::{ServerConfig, SyncServer};

    #[test]
    fn namespace_publishes_demo_schema() {
        let demo = Demo::new();
        let server = SyncServer::with_hooks(ServerConfig::default(), demo.namespace(), demo.hooks()).unwrap();
        let schema = server.schema();

        assert_eq!(schema.kind("math.add"), Some(LeafKind::Function));
        assert_eq!(schema.kind("room.count"), Some(LeafKind::State));
        assert_eq!(schema.kind("room.join"), Some(LeafKind::Function));
        assert_eq!(schema.kind("chat.message"), Some(LeafKind::Signal));
        assert_eq!(schema.kind("presence.online"), Some(LeafKind::State));
        assert_eq!(schema.len(), 8);
    }

    #[test]
    fn namespace_mounts_once() {
        let demo = Demo::new();
        let _server = SyncServer::new(ServerConfig::default(), demo.namespace()).unwrap();
        assert!(SyncServer::new(ServerConfig::default(), demo.namespace()).is_err());
    }

    #[test]
    fn room_names_reject_separator() {
        let args = CallArgs::new(vec![json!("a|b")]);
        assert!(room_arg(&args).is_err());
        let args = CallArgs::new(vec![json!("lobby")]);
        assert_eq!(room_arg(&args).unwrap(), "lobby");
    }

    #[test]
    fn concurrent_joins_report_distinct_counts() {
        let rooms: State<u64> = State::new();
        let mut counts: Vec<u64> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| (0..50).map(|_| join_room(&rooms, "lobby")).collect::<Vec<_>>()))
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });
        counts.sort_unstable();
        assert_eq!(counts, (1..=400).collect::<Vec<u64>>());

        assert_eq!(leave_room(&rooms, "lobby"), 399);
        assert_eq!(leave_room(&rooms, "empty"), 0);
        assert_eq!(rooms.get("empty"), None);
    }

    #[tokio::test]
    async fn demo_round_trip() {
        let demo = Demo::new();
        let server = SyncServer::with_hooks(ServerConfig::default(), demo.namespace(), demo.hooks()).unwrap();
        let (addr, _handle) = server.listen().await.unwrap();
        let client = SyncClient::connect(ClientConfig::new(format!("ws://{addr}/api-sync")))
            .await
            .unwrap();

        let room = client.path("room");
        assert_eq!(room.at("join").call(vec![json!("lobby")]).await.unwrap(), json!(1));
        assert_eq!(room.at("join").call(vec![json!("lobby")]).await.unwrap(), json!(2));
        assert_eq!(room.at("leave").call(vec![json!("lobby")]).await.unwrap(), json!(1));
        assert_eq!(room.at("leave").call(vec![json!("lobby")]).await.unwrap(), json!(0));
        assert_eq!(demo.rooms.get("lobby"), None);

        let sum: f64 = client.path("math.add").call_typed((1.5, 2)).await.unwrap();
        assert!((sum - 3.5).abs() < f64::EPSILON);

        let err = client
            .path("chat.send")
            .call(vec![json!("lobby"), json!("  ")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("EMPTY_MESSAGE"));

        let me = client.path("presence.whoami").call(vec![]).await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = client
            .path("chat.message")
            .signal::<ChatMessage>()
            .unwrap()
            .subscribe(
                move |m| {
                    let _ = tx.send(m);
                },
                "lobby",
            );
        let delivered = client.path("chat.send").call(vec![json!("lobby"), json!("hi")]).await.unwrap();
        assert_eq!(delivered, json!(1));
        let received = rx.recv().await.flatten().unwrap();
        assert_eq!(received.text, "hi");
        assert_eq!(json!(received.from), me);

        assert_eq!(demo.online.get(""), Some(1));
        client.close().await;
    }
}
