//! Error types for ProFit

use thiserror::Error;

/// ProFit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Named object missing from its container (workspace, model config,
    /// dataset, snapshot, ...)
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of object that was looked up.
        kind: &'static str,
        /// Name it was looked up under.
        name: String,
    },

    /// Structural model validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Parameter directive parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`] lookup failure.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
