//! Error taxonomy for storage operations.
//!
//! Backend implementations and the codecs return [`StorageError`].  The
//! public facade never lets one escape: each operation converts it into
//! its documented failure value at the call boundary.

use thiserror::Error;

/// Errors raised by backends, codecs and local I/O.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The bucket or object does not exist.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Network, credential or protocol failure reported by the backend.
    #[error("backend {operation} failed: {message}")]
    Backend { operation: String, message: String },

    /// Image data could not be decoded or re-encoded.
    #[error("image decode failed: {0}")]
    Decode(String),

    /// A caller-supplied argument is unsupported or out of range.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Local stream or file failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Shorthand for a [`StorageError::Backend`] built from any displayable error.
    pub fn backend(operation: &str, err: impl std::fmt::Display) -> Self {
        StorageError::Backend {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    /// Shorthand for a [`StorageError::NotFound`].
    pub fn not_found(resource: impl Into<String>) -> Self {
        StorageError::NotFound {
            resource: resource.into(),
        }
    }

    /// Stable short code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "NotFound",
            StorageError::Backend { .. } => "BackendError",
            StorageError::Decode(_) => "DecodeError",
            StorageError::Validation(_) => "ValidationError",
            StorageError::Io(_) => "IoError",
        }
    }

    /// Whether this error reports a missing bucket or object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Result alias used throughout the backend layer.
pub type StorageResult<T> = Result<T, StorageError>;
