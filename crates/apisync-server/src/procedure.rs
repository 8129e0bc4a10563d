//! Procedures callable over the wire.

use std::future::Future;
use std::sync::Arc;

use apisync_core::{ConnectionId, ServerMessage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::ProcedureError;
use crate::websocket::connection::Connection;

/// A callable namespace leaf.
///
/// Implemented for any `Fn(CallContext, CallArgs) -> impl Future<Output =
/// Result<Value, ProcedureError>>`, so plain async closures can be mounted.
#[async_trait]
pub trait Procedure: Send + Sync {
    /// Run the procedure for one call.
    async fn call(&self, ctx: CallContext, args: CallArgs) -> Result<Value, ProcedureError>;
}

#[async_trait]
impl<F, Fut> Procedure for F
where
    F: Fn(CallContext, CallArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ProcedureError>> + Send + 'static,
{
    async fn call(&self, ctx: CallContext, args: CallArgs) -> Result<Value, ProcedureError> {
        (self)(ctx, args).await
    }
}

/// Positional call parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallArgs(Vec<Value>);

impl CallArgs {
    /// Wrap a parameter list.
    pub fn new(params: Vec<Value>) -> Self {
        Self(params)
    }

    /// Decode parameter `index`.
    ///
    /// A missing parameter decodes from `null`, so `Option<T>` parameters
    /// may be omitted by the caller.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ProcedureError> {
        let value = self.0.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| ProcedureError::invalid_params(format!("parameter {index}: {e}")))
    }

    /// Raw parameter `index`.
    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Number of parameters sent.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameter was sent.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take the parameter list.
    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

/// The calling connection, bound into every procedure call.
#[derive(Clone)]
pub struct CallContext {
    connection: Arc<Connection>,
}

impl CallContext {
    /// Bind a call to `connection`.
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Id of the calling connection.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection.id
    }

    /// The calling connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Whether the caller watches `key`.
    pub fn is_watching(&self, key: &str) -> bool {
        self.connection.is_watching(key)
    }

    /// Keys the caller watches.
    pub fn watched(&self) -> Vec<String> {
        self.connection.watched()
    }

    /// Send an `update` to the caller only.
    pub fn send_update(&self, key: &str, data: Option<Value>) -> bool {
        self.connection.send_message(&ServerMessage::Update {
            key: key.to_owned(),
            data,
        })
    }

    /// Whether the caller is still connected.
    pub fn is_connected(&self) -> bool {
        !self.connection.is_leaving()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("connection_id", self.connection_id())
            .finish()
    }
}
