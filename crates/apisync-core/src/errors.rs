//! Error codes carried in `function-response` error bodies.

/// The called path does not resolve to any namespace node.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// The called path resolves to a namespace, signal or state.
pub const NOT_CALLABLE: &str = "NOT_CALLABLE";
/// The parameter list could not be decoded by the procedure.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// The procedure failed or panicked.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// The procedure did not finish within the handler timeout.
pub const TIMEOUT: &str = "TIMEOUT";
