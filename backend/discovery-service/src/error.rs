/// Error types for discovery-service
///
/// Query-path errors are converted to HTTP responses; event-path errors are
/// only logged by the consumer loop and cause redelivery.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid radius: {0}")]
    InvalidRadius(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u128),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Apply conflict: {0}")]
    ApplyConflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Outbox error: {0}")]
    Outbox(#[from] transactional_outbox::OutboxError),

    #[error("Idempotency error: {0}")]
    Idempotency(#[from] idempotent_consumer::IdempotencyError),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidCoordinate(_) => "INVALID_COORDINATE",
            ServiceError::InvalidRadius(_) => "INVALID_RADIUS",
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceError::Timeout(_) => "TIMEOUT",
            ServiceError::PublishFailed(_) => "PUBLISH_FAILED",
            ServiceError::ApplyConflict(_) => "APPLY_CONFLICT",
            ServiceError::Database(_) => "DATABASE_ERROR",
            ServiceError::Outbox(_) => "OUTBOX_ERROR",
            ServiceError::Idempotency(_) => "IDEMPOTENCY_ERROR",
            ServiceError::Bus(_) => "BUS_ERROR",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn timeout(elapsed: std::time::Duration) -> Self {
        ServiceError::Timeout(elapsed.as_millis())
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidCoordinate(_)
            | ServiceError::InvalidRadius(_)
            | ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Internal details stay in the logs
        let message = if status.is_server_error() && status != StatusCode::GATEWAY_TIMEOUT {
            tracing::error!(error = %self, code = self.code(), "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(status).json(serde_json::json!({
            "error": message,
            "code": self.code(),
            "status": status.as_u16(),
        }))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl From<resilience::TimeoutError> for ServiceError {
    fn from(err: resilience::TimeoutError) -> Self {
        ServiceError::timeout(err.after)
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
