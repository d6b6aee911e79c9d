//! Error types for the idempotent consumer library

use thiserror::Error;

/// Result type for idempotency operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Errors that can occur during idempotent event processing
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transaction holding the effect and the processed marker failed to commit
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Event ID validation failed (empty, too long, invalid format)
    #[error("Invalid event ID: {0}")]
    InvalidEventId(String),

    /// JSON serialization/deserialization error for metadata
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
