use thiserror::Error;
use uuid::Uuid;

pub type OutboxResult<T> = Result<T, OutboxError>;

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The row was removed between fetch and mark
    #[error("Outbox row not found: {0}")]
    EventNotFound(Uuid),

    /// The bus kept rejecting the event after the publisher's own retries
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}
