//! WebSocket transport: per-connection state, registry, liveness, sessions.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
