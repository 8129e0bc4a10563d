//! Everything a session needs, built once from the mounted namespace.

use std::sync::Arc;
use std::time::Duration;

use apisync_core::{Schema, ServerMessage};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::errors::NamespaceError;
use crate::hooks::LifecycleHooks;
use crate::namespace::{self, Namespace};
use crate::state::StateRegistry;
use crate::websocket::registry::ConnectionRegistry;

/// Shared server core: connections, state lookup, dispatch and the schema.
pub struct Engine {
    /// Server configuration.
    pub config: ServerConfig,
    /// Open connections.
    pub connections: Arc<ConnectionRegistry>,
    /// Mounted states, for the current-value push on `on`.
    pub states: StateRegistry,
    /// Procedure dispatcher.
    pub dispatcher: Dispatcher,
    schema: Schema,
    schema_frame: Arc<String>,
    slots: Arc<Semaphore>,
}

impl Engine {
    /// Mount `namespace` and prepare the schema frame.
    pub fn new(
        config: ServerConfig,
        namespace: Namespace,
        hooks: Arc<dyn LifecycleHooks>,
    ) -> Result<Self, NamespaceError> {
        let connections = Arc::new(ConnectionRegistry::new(hooks));
        let mounted = namespace::mount(&namespace, &connections)?;

        let schema_frame = match (ServerMessage::Schema {
            data: mounted.schema.clone(),
        })
        .encode()
        {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to encode schema, sending an empty one");
                r#"{"type":"schema","data":{}}"#.to_owned()
            }
        };
        info!(leaves = mounted.schema.len(), states = mounted.states.len(), "namespace mounted");

        let timeout = Duration::from_secs(config.handler_timeout_secs.max(1));
        let slots = Arc::new(Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS)));
        Ok(Self {
            slots,
            dispatcher: Dispatcher::new(Arc::new(namespace), timeout),
            config,
            connections,
            states: mounted.states,
            schema: mounted.schema,
            schema_frame: Arc::new(schema_frame),
        })
    }

    /// The published schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Reserve a connection slot for the lifetime of a session.
    ///
    /// `None` once `max_connections` sessions hold one. Taken before the
    /// upgrade, so concurrent upgrades cannot overshoot the limit.
    pub fn reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }

    /// Encoded `schema` frame sent to every new connection.
    pub fn schema_frame(&self) -> &Arc<String> {
        &self.schema_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use crate::state::State;
    use apisync_core::LeafKind;
    use serde_json::{Value, json};

    #[test]
    fn engine_mounts_and_encodes_schema() {
        let count: State<u32> = State::new();
        let ns = Namespace::new().nest("room", Namespace::new().state("count", &count));
        let engine = Engine::new(ServerConfig::default(), ns, Arc::new(NoopHooks)).unwrap();

        assert_eq!(engine.schema().kind("room.count"), Some(LeafKind::State));
        assert!(engine.states.contains("room.count"));
        let frame: Value = serde_json::from_str(engine.schema_frame()).unwrap();
        assert_eq!(frame, json!({"type": "schema", "data": {"room.count": "state"}}));
    }

    #[test]
    fn slots_are_bounded_by_max_connections() {
        let config = ServerConfig {
            max_connections: 2,
            ..ServerConfig::default()
        };
        let engine = Engine::new(config, Namespace::new(), Arc::new(NoopHooks)).unwrap();

        let first = engine.reserve_slot().unwrap();
        let _second = engine.reserve_slot().unwrap();
        assert!(engine.reserve_slot().is_none());

        drop(first);
        assert!(engine.reserve_slot().is_some());
    }

    #[test]
    fn invalid_namespace_fails() {
        let shared: State<u32> = State::new();
        let ns = Namespace::new().state("a", &shared).state("b", &shared);
        assert!(Engine::new(ServerConfig::default(), ns, Arc::new(NoopHooks)).is_err());
    }
}
