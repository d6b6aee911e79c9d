use std::future::Future;
use std::time::Duration;

/// The wrapped operation did not finish within its budget; it was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {after:?}")]
pub struct TimeoutError {
    pub after: Duration,
}

/// Run `future` for at most `budget`.
pub async fn with_timeout<F: Future>(budget: Duration, future: F) -> Result<F::Output, TimeoutError> {
    tokio::time::timeout(budget, future)
        .await
        .map_err(|_| TimeoutError { after: budget })
}
