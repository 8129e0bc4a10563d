//! # apisync-client
//!
//! Client half of the apisync engine.
//!
//! - [`SyncClient`]: one WebSocket connection, the pending-call table and the
//!   watch table
//! - [`ApiPath`]: dotted-path builder; `call` for procedures, `signal` /
//!   `state` for subscriptions, checked against the published schema
//! - [`SignalHandle`] / [`StateHandle`]: ref-counted subscriptions, a local
//!   last-value cache and a `tokio::sync::watch` reactive read

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod handles;
pub mod path;
pub mod pending;
pub mod watch;

pub use client::SyncClient;
pub use config::ClientConfig;
pub use errors::{CallError, ClientError};
pub use handles::{SignalHandle, StateHandle, Subscription, SyncedValue};
pub use path::ApiPath;
