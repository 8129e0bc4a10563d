//! Envelope codec.
//!
//! Every frame is a JSON object `{ type, key?, data? }`. Decoding validates the
//! required fields per message type and reports a typed [`EnvelopeError`] so
//! the receiver can log and drop the frame without closing the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Schema;

/// Why a frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Not a JSON object of the envelope shape.
    #[error("invalid JSON envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The `type` discriminator is absent or empty.
    #[error("payload type is missing")]
    MissingType,
    /// The `type` discriminator is not part of this message family.
    #[error("unknown payload type '{0}'")]
    UnknownType(String),
    /// A message type that requires `key` arrived without one.
    #[error("payload key is missing in '{kind}'")]
    MissingKey {
        /// Message type.
        kind: &'static str,
    },
    /// A message type that requires `data` arrived without it.
    #[error("payload data is missing in '{kind}'")]
    MissingData {
        /// Message type.
        kind: &'static str,
    },
    /// `data` is present but does not have the expected shape.
    #[error("invalid data in '{kind}': {source}")]
    InvalidData {
        /// Message type.
        kind: &'static str,
        /// Decoding failure.
        source: serde_json::Error,
    },
}

/// Payload of a `function-call`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Dotted procedure path.
    pub path: String,
    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Outcome discriminator of a `function-response`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The procedure returned; `result` is set.
    Success,
    /// The call failed; `error` is set.
    Error,
}

/// Payload of a `function-response`.
///
/// Build it with [`FunctionResponse::success`] or [`FunctionResponse::error`]
/// so `status` always agrees with the populated field. Receivers decide the
/// outcome from `status` alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Outcome.
    pub status: ResponseStatus,
    /// Procedure result (success only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Stringified error (error only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code (error only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FunctionResponse {
    /// Successful call returning `result`.
    pub fn success(result: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            result: Some(result),
            error: None,
            code: None,
        }
    }

    /// Failed call.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: None,
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Client → server messages.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// Start watching a full key.
    On {
        /// Full key (`path` or `path|dependency`).
        key: String,
    },
    /// Stop watching a full key.
    Off {
        /// Full key.
        key: String,
    },
    /// Invoke a procedure.
    FunctionCall {
        /// Correlation id chosen by the client.
        key: String,
        /// Path and parameters.
        data: FunctionCall,
    },
    /// Liveness answer to `ping`.
    Pong,
}

/// Server → client messages.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// Liveness check.
    Ping,
    /// New value for a watched key. `None` means the slot has no value.
    Update {
        /// Full key.
        key: String,
        /// New value.
        data: Option<Value>,
    },
    /// Result of a procedure call.
    FunctionResponse {
        /// Correlation id echoed from the call.
        key: String,
        /// Outcome.
        data: FunctionResponse,
    },
    /// Namespace description, sent once after connect.
    Schema {
        /// Path → kind.
        data: Schema,
    },
}

/// On-wire shape shared by both families.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl RawEnvelope {
    fn parse(text: &str) -> Result<(String, Self), EnvelopeError> {
        let mut raw: Self = serde_json::from_str(text)?;
        match raw.kind.take() {
            Some(kind) if !kind.is_empty() => Ok((kind, raw)),
            _ => Err(EnvelopeError::MissingType),
        }
    }

    fn take_key(&mut self, kind: &'static str) -> Result<String, EnvelopeError> {
        match self.key.take() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(EnvelopeError::MissingKey { kind }),
        }
    }

    fn take_data<T: serde::de::DeserializeOwned>(
        &mut self,
        kind: &'static str,
    ) -> Result<T, EnvelopeError> {
        let value = self.data.take().ok_or(EnvelopeError::MissingData { kind })?;
        serde_json::from_value(value).map_err(|source| EnvelopeError::InvalidData { kind, source })
    }

    fn encode(kind: &str, key: Option<&str>, data: Option<Value>) -> serde_json::Result<String> {
        serde_json::to_string(&Self {
            kind: Some(kind.to_owned()),
            key: key.map(str::to_owned),
            data,
        })
    }
}

impl ClientMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::On { .. } => "on",
            Self::Off { .. } => "off",
            Self::FunctionCall { .. } => "function-call",
            Self::Pong => "pong",
        }
    }

    /// Decode and validate a text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let (kind, mut raw) = RawEnvelope::parse(text)?;
        match kind.as_str() {
            "pong" => Ok(Self::Pong),
            "on" => Ok(Self::On {
                key: raw.take_key("on")?,
            }),
            "off" => Ok(Self::Off {
                key: raw.take_key("off")?,
            }),
            "function-call" => {
                let key = raw.take_key("function-call")?;
                let data = raw.take_data("function-call")?;
                Ok(Self::FunctionCall { key, data })
            }
            _ => Err(EnvelopeError::UnknownType(kind)),
        }
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> serde_json::Result<String> {
        match self {
            Self::On { key } | Self::Off { key } => RawEnvelope::encode(self.kind(), Some(key), None),
            Self::FunctionCall { key, data } => {
                RawEnvelope::encode(self.kind(), Some(key), Some(serde_json::to_value(data)?))
            }
            Self::Pong => RawEnvelope::encode(self.kind(), None, None),
        }
    }
}

impl ServerMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Update { .. } => "update",
            Self::FunctionResponse { .. } => "function-response",
            Self::Schema { .. } => "schema",
        }
    }

    /// Decode and validate a text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let (kind, mut raw) = RawEnvelope::parse(text)?;
        match kind.as_str() {
            "ping" => Ok(Self::Ping),
            "update" => Ok(Self::Update {
                key: raw.take_key("update")?,
                data: raw.data.take(),
            }),
            "function-response" => {
                let key = raw.take_key("function-response")?;
                let data = raw.take_data("function-response")?;
                Ok(Self::FunctionResponse { key, data })
            }
            "schema" => Ok(Self::Schema {
                data: raw.take_data("schema")?,
            }),
            _ => Err(EnvelopeError::UnknownType(kind)),
        }
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> serde_json::Result<String> {
        match self {
            Self::Ping => RawEnvelope::encode(self.kind(), None, None),
            Self::Update { key, data } => RawEnvelope::encode(self.kind(), Some(key), data.clone()),
            Self::FunctionResponse { key, data } => {
                RawEnvelope::encode(self.kind(), Some(key), Some(serde_json::to_value(data)?))
            }
            Self::Schema { data } => {
                RawEnvelope::encode(self.kind(), None, Some(serde_json::to_value(data)?))
            }
        }
    }
}
