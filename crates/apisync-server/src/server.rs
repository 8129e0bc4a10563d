//! `SyncServer`: axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apisync_core::{ConnectionId, Schema};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::errors::NamespaceError;
use crate::health::{self, HealthResponse};
use crate::hooks::{LifecycleHooks, NoopHooks};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::namespace::Namespace;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::heartbeat;
use crate::websocket::registry::{ConnectionRegistry, LeaveReason};
use crate::websocket::session::run_ws_session;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The sync server.
pub struct SyncServer {
    engine: Arc<Engine>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl SyncServer {
    /// Mount `namespace` and create a server without lifecycle hooks.
    pub fn new(config: ServerConfig, namespace: Namespace) -> Result<Self, NamespaceError> {
        Self::with_hooks(config, namespace, Arc::new(NoopHooks))
    }

    /// Mount `namespace` and create a server that fires `hooks`.
    pub fn with_hooks(
        config: ServerConfig,
        namespace: Namespace,
        hooks: Arc<dyn LifecycleHooks>,
    ) -> Result<Self, NamespaceError> {
        Ok(Self {
            engine: Arc::new(Engine::new(config, namespace, hooks)?),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        })
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route(&self.engine.config.route(), get(ws_handler))
            .route("/health", get(health_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind, start the liveness supervisor, and serve until shutdown.
    ///
    /// Returns the bound address and the serve task. The supervisor task is
    /// tracked by the shutdown coordinator. On shutdown every open connection
    /// is evicted before the listener stops.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.engine.config;
        let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;

        self.shutdown.track(tokio::spawn(heartbeat::run_supervisor(
            self.engine.connections.clone(),
            Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            config.max_missed_pongs,
            self.shutdown.token(),
        )));

        let router = self.router();
        let token = self.shutdown.token();
        let connections = self.engine.connections.clone();
        let handle = tokio::spawn(async move {
            let signal = async move {
                token.cancelled().await;
                let evicted = connections.evict_all(LeaveReason::Shutdown);
                info!(evicted, "server shutting down");
            };
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(signal).await {
                warn!(error = %e, "server error");
            }
        });

        info!(%addr, path = %config.route(), "sync server listening");
        Ok((addr, handle))
    }

    /// The published schema.
    pub fn schema(&self) -> &Schema {
        self.engine.schema()
    }

    /// Open connections.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.engine.connections
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.engine.config
    }
}

/// GET /{path}: WebSocket upgrade, refused with 503 at the connection limit.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let engine = state.engine;
    let Some(slot) = engine.reserve_slot() else {
        warn!(limit = engine.config.max_connections, "connection limit reached, refusing upgrade");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let id = ConnectionId::new();
    ws.max_message_size(engine.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, id, engine).await;
            drop(slot);
        })
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.engine.connections.len()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
