//! Settings types. Every struct deserializes with defaults for missing fields.

use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSyncSettings {
    /// Server settings.
    pub server: ServerSettings,
    /// Client settings.
    pub client: ClientSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Server network and liveness settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
    /// WebSocket route, without the leading slash.
    pub path: String,
    /// Seconds between heartbeat sweeps.
    pub heartbeat_interval_secs: u64,
    /// Consecutive unanswered pings before a connection is terminated.
    pub max_missed_pongs: u32,
    /// Seconds a single procedure may run before a timeout response is sent.
    pub handler_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9847,
            path: "api-sync".to_string(),
            heartbeat_interval_secs: 30,
            max_missed_pongs: 1,
            handler_timeout_secs: 60,
            max_connections: 1024,
            send_queue_capacity: 1024,
        }
    }
}

/// Client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// WebSocket URL of the server.
    pub url: String,
    /// Seconds before an unanswered call is rejected.
    pub call_timeout_secs: u64,
    /// Reject calls to paths missing from the published schema without a round trip.
    pub strict_paths: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9847/api-sync".to_string(),
            call_timeout_secs: 30,
            strict_paths: true,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
