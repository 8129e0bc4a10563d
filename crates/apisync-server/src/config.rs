//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the sync server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// WebSocket route without the leading slash (default `"api-sync"`).
    pub path: String,
    /// Maximum concurrent WebSocket connections. Upgrades beyond it get 503.
    pub max_connections: usize,
    /// Seconds between liveness sweeps.
    pub heartbeat_interval_secs: u64,
    /// Sweeps a connection may stay unanswered before it is terminated.
    pub max_missed_pongs: u32,
    /// Seconds a procedure may run before a `TIMEOUT` response is sent.
    pub handler_timeout_secs: u64,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "api-sync".into(),
            max_connections: 1024,
            heartbeat_interval_secs: 30,
            max_missed_pongs: 1,
            handler_timeout_secs: 60,
            send_queue_capacity: 1024,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl ServerConfig {
    /// Route the WebSocket upgrade is served on, with a leading slash.
    pub fn route(&self) -> String {
        format!("/{}", self.path.trim_start_matches('/'))
    }
}
