//! Error types for the write/commit engine.

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Errors raised by the write/commit engine and the index engine seam.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// I/O failure reported by the index engine.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic index engine failure.
    #[error("Index error: {0}")]
    Index(String),

    /// The on-disk (or in-memory) write lock is held by somebody else.
    #[error("Lock obtain failed: {0}")]
    LockObtainFailed(String),

    /// The writer was used after it had been closed.
    #[error("Index writer is closed: {0}")]
    WriterClosed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation is not available for the configured workspace.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The caller was interrupted while waiting.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SluiceError {
    pub fn index(msg: impl Into<String>) -> Self {
        SluiceError::Index(msg.into())
    }

    pub fn lock_obtain_failed(msg: impl Into<String>) -> Self {
        SluiceError::LockObtainFailed(msg.into())
    }

    pub fn writer_closed(msg: impl Into<String>) -> Self {
        SluiceError::WriterClosed(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        SluiceError::InvalidConfig(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        SluiceError::InvalidArgument(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        SluiceError::InvalidOperation(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        SluiceError::Unsupported(msg.into())
    }

    pub fn interrupted(msg: impl Into<String>) -> Self {
        SluiceError::Interrupted(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SluiceError::Internal(msg.into())
    }

    /// Whether this error comes from the resource layer (open/commit/close).
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            SluiceError::Io(_)
                | SluiceError::LockObtainFailed(_)
                | SluiceError::WriterClosed(_)
                | SluiceError::Index(_)
        )
    }
}
