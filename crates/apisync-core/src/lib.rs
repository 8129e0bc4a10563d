//! # apisync-core
//!
//! Data contract shared by the apisync server and client:
//!
//! - Envelope codec for both message families (`on`, `off`, `function-call`,
//!   `pong` / `ping`, `update`, `function-response`, `schema`)
//! - Key grammar: `segment(.segment)*` with an optional `|dependency` suffix
//! - Namespace schema published to every new connection
//! - Branded connection / request ids
//! - Wire error codes

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod key;
pub mod schema;

pub use envelope::{ClientMessage, EnvelopeError, FunctionCall, FunctionResponse, ResponseStatus, ServerMessage};
pub use ids::{ConnectionId, RequestId};
pub use key::Key;
pub use schema::{LeafKind, Schema};
