//! Error types for the entity model.

use thiserror::Error;

/// Result type for entity operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Result type for [`Backend`](crate::Backend) calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported by the backend.
///
/// Cloneable so a single failure can be handed to every caller waiting on
/// the same in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend has no document with this id.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The backend refused the request.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request did not reach the backend or the reply was lost.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors surfaced by entity operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Backend call failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The operation's task panicked or was dropped before finishing.
    #[error("operation aborted: {0}")]
    Aborted(String),

    /// Document (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed id.
    #[error(transparent)]
    Types(#[from] pulse_types::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
