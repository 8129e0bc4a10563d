//! Dotted-path builder over the remote namespace.

use apisync_core::key::PATH_SEPARATOR;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::SyncClient;
use crate::errors::{CallError, ClientError};
use crate::handles::{SignalHandle, StateHandle};

/// A position in the remote namespace.
///
/// ```ignore
/// let sum: i64 = client.api().at("math").at("add").call_typed((2, 3)).await?;
/// let count = client.path("room.count").state::<u32>()?;
/// ```
#[derive(Clone, Debug)]
pub struct ApiPath {
    client: SyncClient,
    path: String,
}

impl ApiPath {
    pub(crate) fn new(client: SyncClient, path: String) -> Self {
        Self { client, path }
    }

    /// Extend the path by one or more dotted segments.
    #[must_use]
    pub fn at(&self, segment: &str) -> Self {
        let path = if self.path.is_empty() {
            segment.to_owned()
        } else {
            format!("{}{PATH_SEPARATOR}{segment}", self.path)
        };
        Self::new(self.client.clone(), path)
    }

    /// The accumulated dotted path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Call the procedure at this path with positional parameters.
    pub async fn call(&self, params: Vec<Value>) -> Result<Value, CallError> {
        self.client.call(&self.path, params).await
    }

    /// Call with serialized arguments and decode the result.
    ///
    /// A tuple or sequence is sent as the positional list, `()` as no
    /// parameters, and any other value as the single parameter.
    pub async fn call_typed<A, R>(&self, args: A) -> Result<R, CallError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let params = match serde_json::to_value(args).map_err(CallError::Encode)? {
            Value::Array(params) => params,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        let result = self.call(params).await?;
        serde_json::from_value(result).map_err(CallError::Decode)
    }

    /// Subscription handle for the signal (or state) at this path.
    pub fn signal<T>(&self) -> Result<SignalHandle<T>, ClientError> {
        self.client.check_subscribable(&self.path, false)?;
        Ok(SignalHandle::new(self.client.clone(), self.path.clone()))
    }

    /// Subscription and cache handle for the state at this path.
    pub fn state<T>(&self) -> Result<StateHandle<T>, ClientError> {
        self.client.check_subscribable(&self.path, true)?;
        Ok(StateHandle::new(self.client.clone(), self.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{demo_schema, detached};
    use crate::config::ClientConfig;

    #[test]
    fn at_joins_segments() {
        let (client, _rx) = detached(demo_schema(), ClientConfig::default());
        let api = client.api();
        assert_eq!(api.path(), "");
        assert_eq!(api.at("math").at("add").path(), "math.add");
        assert_eq!(api.at("math.add").path(), "math.add");
        assert_eq!(client.path("room").at("count").path(), "room.count");
    }

    #[test]
    fn accessors_check_the_schema() {
        let (client, _rx) = detached(demo_schema(), ClientConfig::default());

        assert!(client.path("room.count").state::<u32>().is_ok());
        assert!(client.path("room.count").signal::<u32>().is_ok());
        assert!(client.path("chat.message").signal::<String>().is_ok());
        assert!(matches!(
            client.path("chat.message").state::<String>(),
            Err(ClientError::NotAState { .. })
        ));
        assert!(matches!(
            client.path("math.add").signal::<i64>(),
            Err(ClientError::NotSubscribable { kind: "function", .. })
        ));
        assert!(matches!(
            client.path("nope").signal::<i64>(),
            Err(ClientError::UnknownPath { .. })
        ));
    }

    #[tokio::test]
    async fn call_typed_encodes_arguments() {
        let config = ClientConfig {
            call_timeout_secs: 1,
            ..ClientConfig::default()
        };
        let (client, mut rx) = detached(demo_schema(), config);
        let add = client.path("math.add");

        let pending = tokio::spawn(async move {
            let _ = add.call_typed::<_, i64>((2, 3)).await;
        });
        let frame = loop {
            if let Some(frame) = crate::client::tests::sent(&mut rx).pop() {
                break frame;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(frame["data"]["params"], serde_json::json!([2, 3]));
        pending.abort();
    }
}
