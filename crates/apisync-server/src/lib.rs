//! # apisync-server
//!
//! Server half of the apisync engine.
//!
//! - [`Namespace`] builder: procedures, signals, states and custom state
//!   sources, mounted once by [`SyncServer::new`]
//! - [`Signal`] / [`State`]: keyed broadcast values, fanned out only to
//!   connections watching the exact key
//! - Connection registry with a heartbeat supervisor and a single eviction path
//! - Procedure dispatch by dotted path, with a handler timeout and panic capture
//! - Axum transport: WebSocket upgrade route, `/health`, optional `/metrics`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod health;
pub mod hooks;
pub mod metrics;
pub mod namespace;
pub mod procedure;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{NamespaceError, ProcedureError};
pub use hooks::{LifecycleHooks, NoopHooks};
pub use namespace::Namespace;
pub use procedure::{CallArgs, CallContext, Procedure};
pub use server::SyncServer;
pub use state::{Signal, State, StateSource};
pub use websocket::connection::Connection;
