//! Error types for selah-core

use thiserror::Error;

/// Result type alias using selah-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in selah-core operations
///
/// Storage errors are non-retryable from the caller's perspective: a
/// failed local write was rolled back and nothing reached the sync queue.
#[derive(Error, Debug)]
pub enum Error {
    /// Local persistence error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
