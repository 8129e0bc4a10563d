//! Procedure dispatch by dotted path.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apisync_core::FunctionCall;
use apisync_core::FunctionResponse;
use apisync_core::errors::{INTERNAL_ERROR, METHOD_NOT_FOUND, NOT_CALLABLE, TIMEOUT};
use apisync_core::key::PATH_SEPARATOR;
use futures::FutureExt;
use metrics::{counter, histogram};
use tracing::{debug, error, instrument, warn};

use crate::hooks::panic_message;
use crate::metrics::{CALL_DURATION_SECONDS, CALL_ERRORS_TOTAL, CALLS_TOTAL};
use crate::namespace::{Namespace, Node};
use crate::procedure::{CallArgs, CallContext, Procedure};

/// Where a call path leads.
pub enum Resolution<'a> {
    /// A procedure.
    Procedure(&'a Arc<dyn Procedure>),
    /// A namespace, signal or state (the kind name is carried).
    NotCallable(&'static str),
    /// Some segment does not exist.
    NotFound,
}

/// Resolves call paths against the mounted namespace and runs procedures.
pub struct Dispatcher {
    root: Arc<Namespace>,
    timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over `root` with a per-call `timeout`.
    pub fn new(root: Arc<Namespace>, timeout: Duration) -> Self {
        Self { root, timeout }
    }

    /// Walk `path` segment by segment from the root.
    pub fn resolve(&self, path: &str) -> Resolution<'_> {
        let mut current = self.root.as_ref();
        let mut segments = path.split(PATH_SEPARATOR).peekable();

        while let Some(segment) = segments.next() {
            let Some(node) = current.child(segment) else {
                return Resolution::NotFound;
            };
            let is_last = segments.peek().is_none();
            match (node, is_last) {
                (Node::Procedure(procedure), true) => return Resolution::Procedure(procedure),
                (Node::Namespace(inner), false) => current = inner,
                (other, true) => return Resolution::NotCallable(other.kind_name()),
                (_, false) => return Resolution::NotFound,
            }
        }
        Resolution::NotFound
    }

    /// Run one call and build its single response.
    ///
    /// Procedure errors, panics and timeouts all become `error` responses.
    #[instrument(skip_all, fields(conn_id = %ctx.connection_id(), path = %call.path))]
    pub async fn dispatch(&self, ctx: CallContext, call: FunctionCall) -> FunctionResponse {
        let FunctionCall { path, params } = call;

        let procedure = match self.resolve(&path) {
            Resolution::Procedure(procedure) => procedure.clone(),
            Resolution::NotCallable(kind) => {
                warn!(kind, "call to non-callable path");
                counter!(CALL_ERRORS_TOTAL, "path" => "invalid", "code" => NOT_CALLABLE).increment(1);
                return FunctionResponse::error(NOT_CALLABLE, format!("'{path}' is a {kind}, not a function"));
            }
            Resolution::NotFound => {
                warn!("call to unknown path");
                counter!(CALL_ERRORS_TOTAL, "path" => "invalid", "code" => METHOD_NOT_FOUND).increment(1);
                return FunctionResponse::error(METHOD_NOT_FOUND, format!("no function at '{path}'"));
            }
        };

        counter!(CALLS_TOTAL, "path" => path.clone()).increment(1);
        debug!(params = params.len(), "calling procedure");

        let start = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(procedure.call(ctx, CallArgs::new(params))).catch_unwind(),
        )
        .await;

        let response = match result {
            Ok(Ok(Ok(value))) => FunctionResponse::success(value),
            Ok(Ok(Err(err))) => {
                debug!(code = err.code(), error = %err, "procedure returned error");
                counter!(CALL_ERRORS_TOTAL, "path" => path.clone(), "code" => err.code().to_owned()).increment(1);
                FunctionResponse::error(err.code(), err.to_string())
            }
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(panic = %msg, "procedure panicked");
                counter!(CALL_ERRORS_TOTAL, "path" => path.clone(), "code" => INTERNAL_ERROR).increment(1);
                FunctionResponse::error(INTERNAL_ERROR, format!("procedure panicked: {msg}"))
            }
            Err(_elapsed) => {
                error!(timeout = ?self.timeout, "procedure timed out");
                counter!(CALL_ERRORS_TOTAL, "path" => path.clone(), "code" => TIMEOUT).increment(1);
                FunctionResponse::error(TIMEOUT, format!("'{path}' timed out after {:?}", self.timeout))
            }
        };

        let duration = start.elapsed();
        histogram!(CALL_DURATION_SECONDS, "path" => path).record(duration.as_secs_f64());
        if duration.as_secs() >= 5 {
            warn!(duration_secs = duration.as_secs_f64(), "slow procedure call");
        }
        response
    }
}
