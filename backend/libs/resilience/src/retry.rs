use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff between attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Spread each pause by up to ±30%
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        crate::presets::bus_publish()
    }
}

impl RetryConfig {
    /// Pause before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn pause(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if !self.jitter {
            return base;
        }
        base.mul_f64(rand::thread_rng().gen_range(0.7..1.3))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {retries} retries: {last}")]
    MaxRetriesExceeded { retries: u32, last: E },
}

impl<E> RetryError<E> {
    /// Error from the final attempt
    pub fn into_last(self) -> E {
        match self {
            RetryError::MaxRetriesExceeded { last, .. } => last,
        }
    }
}

/// Call `op` until it succeeds or `config.max_retries` retries have failed.
pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retry = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if retry == config.max_retries {
            return Err(RetryError::MaxRetriesExceeded {
                retries: retry,
                last: err,
            });
        }
        retry += 1;

        let pause = config.pause(retry);
        warn!(
            error = %err,
            retry,
            max_retries = config.max_retries,
            pause_ms = pause.as_millis() as u64,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(pause).await;
    }
}
