//! Connection lifecycle hooks.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::error;

use crate::websocket::connection::Connection;

/// Callbacks fired as connections join and leave.
///
/// For each connection `on_join` fires once after the schema is queued, and
/// `on_before_leave` / `on_after_leave` fire exactly once, in that order,
/// whichever path (close or liveness timeout) removes it. A panicking hook is
/// logged and does not affect the connection bookkeeping.
pub trait LifecycleHooks: Send + Sync {
    /// The connection is registered and has been sent the schema.
    fn on_join(&self, _connection: &Connection) {}

    /// The connection is about to be terminated and removed.
    fn on_before_leave(&self, _connection: &Connection) {}

    /// The connection has been removed from the registry.
    fn on_after_leave(&self, _connection: &Connection) {}
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {}

/// Run one hook, logging a panic instead of propagating it.
pub(crate) fn invoke(hook: &'static str, connection: &Connection, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        error!(
            hook,
            conn_id = %connection.id,
            panic = %panic_message(&panic),
            "lifecycle hook panicked"
        );
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
