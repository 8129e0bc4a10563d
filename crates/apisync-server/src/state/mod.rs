//! Keyed signals and states.
//!
//! A [`Signal`] gets its dotted key when its namespace is mounted and
//! broadcasts `update` frames to connections watching `key` or
//! `key|dependency`. A [`State`] is a signal that also keeps the last value
//! per dependency, so new watchers receive it immediately.

pub mod registry;
pub mod signal;
pub mod store;

pub use registry::{StateRegistry, StateSource};
pub use signal::Signal;
pub use store::State;
