//! Procedure and namespace error types.

use apisync_core::errors::{INTERNAL_ERROR, INVALID_PARAMS};

/// Error returned by a procedure. Sent to the caller as an `error` response.
#[derive(Debug, thiserror::Error)]
pub enum ProcedureError {
    /// A parameter is missing or has the wrong shape.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// The procedure failed.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Application error with its own code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl ProcedureError {
    /// Build an [`InvalidParams`](Self::InvalidParams) error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Build an [`Internal`](Self::Internal) error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Build a [`Custom`](Self::Custom) error.
    pub fn custom(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Custom { code, .. } => code,
        }
    }
}

/// Error raised while mounting a namespace.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    /// A signal or state is already mounted, here or on another server.
    #[error("'{path}' is already mounted at '{existing}'")]
    AlreadyBound {
        /// Path of the second mount.
        path: String,
        /// Key assigned by the first mount.
        existing: String,
    },

    /// A child name is empty or contains a separator.
    #[error("invalid namespace entry name '{name}'")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The same name was declared twice in one namespace.
    #[error("'{path}' is declared more than once")]
    Duplicate {
        /// Full dotted path of the duplicate.
        path: String,
    },
}
