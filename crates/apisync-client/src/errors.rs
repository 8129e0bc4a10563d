//! Client error types.

use std::time::Duration;

/// Connection-level failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// WebSocket handshake failed.
    #[error("connect failed: {0}")]
    Connect(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The server did not open with a `schema` frame.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The handshake did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The connection is closed.
    #[error("disconnected")]
    Disconnected,

    /// The path is not in the published schema.
    #[error("unknown path '{path}'")]
    UnknownPath {
        /// Dotted path.
        path: String,
    },

    /// The path names a function, not a signal or state.
    #[error("'{path}' is a {kind}, not subscribable")]
    NotSubscribable {
        /// Dotted path.
        path: String,
        /// Kind found in the schema.
        kind: &'static str,
    },

    /// The path is a signal, so it has no state cache.
    #[error("'{path}' is a {kind}, not a state")]
    NotAState {
        /// Dotted path.
        path: String,
        /// Kind found in the schema.
        kind: &'static str,
    },

    /// A value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures of a single procedure call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The server answered with `status: "error"`.
    #[error("{code}: {message}")]
    Remote {
        /// Machine-readable code.
        code: String,
        /// Error text.
        message: String,
    },

    /// No response within the call timeout. The pending entry is discarded.
    #[error("call to '{path}' timed out after {timeout:?}")]
    Timeout {
        /// Called path.
        path: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The connection dropped before the response arrived.
    #[error("disconnected before a response arrived")]
    Disconnected,

    /// The path is not in the published schema.
    #[error("unknown path '{path}'")]
    UnknownPath {
        /// Dotted path.
        path: String,
    },

    /// The path names a signal, state or namespace.
    #[error("'{path}' is a {kind}, not a function")]
    NotCallable {
        /// Dotted path.
        path: String,
        /// Kind found in the schema.
        kind: &'static str,
    },

    /// Arguments could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The result did not match the expected type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

impl CallError {
    /// Remote error code, if the server produced one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}
