//! Error types for the quick-sticky engine
//!
//! All errors use thiserror for structured error handling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage context invalidated")]
    ContextInvalidated,

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Whether this error means the storage context is permanently gone.
    ///
    /// Host runtimes report this condition only through the error message,
    /// so detection is by substring in addition to the dedicated variant.
    pub fn is_context_invalidated(&self) -> bool {
        match self {
            AppError::ContextInvalidated => true,
            AppError::Backend(msg) | AppError::Generic(msg) => {
                msg.to_lowercase().contains("context invalidated")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
