//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`SyncClient`](crate::SyncClient).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the server route.
    pub url: String,
    /// Seconds a call may stay unanswered before it fails with `Timeout`.
    pub call_timeout_secs: u64,
    /// Seconds allowed for the handshake and the first `schema` frame.
    pub connect_timeout_secs: u64,
    /// Reject calls and subscriptions to paths missing from the schema.
    pub strict_paths: bool,
}

impl ClientConfig {
    /// Default config pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Pending-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9847/api-sync".into(),
            call_timeout_secs: 30,
            connect_timeout_secs: 10,
            strict_paths: true,
        }
    }
}
