//! Retry and timeout composed the way the outbox publisher and the
//! lifecycle consumer use them.

use resilience::{presets, with_retry, with_timeout, RetryConfig, RetryError, TimeoutError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

fn no_jitter(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        jitter: false,
        ..presets::bus_publish()
    }
}

#[tokio::test]
async fn test_hung_send_is_retried_under_a_per_attempt_budget() {
    let sends = AtomicU32::new(0);
    let counter = &sends;

    // First send hangs on a dead broker connection, the second is acked
    let result = with_retry(no_jitter(2), move || async move {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        with_timeout(Duration::from_millis(20), async move {
            if n == 0 {
                std::future::pending::<()>().await;
            }
            n
        })
        .await
    })
    .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(sends.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_every_send_hanging_reports_the_timeout() {
    let err = with_retry(no_jitter(1), || {
        with_timeout(Duration::from_millis(5), std::future::pending::<()>())
    })
    .await
    .unwrap_err();

    match err {
        RetryError::MaxRetriesExceeded { retries, last } => {
            assert_eq!(retries, 1);
            assert_eq!(last, TimeoutError { after: Duration::from_millis(5) });
        }
    }
}

#[tokio::test]
async fn test_overall_budget_bounds_a_retrying_effect() {
    let config = RetryConfig {
        max_retries: 10,
        initial_backoff: Duration::from_millis(50),
        jitter: false,
        ..presets::bus_publish()
    };

    let started = Instant::now();
    let result = with_timeout(
        Duration::from_millis(80),
        with_retry(config, || async { Err::<(), _>("commit failed") }),
    )
    .await;

    assert!(result.is_err(), "the outer budget wins over the retry loop");
    assert!(started.elapsed() < Duration::from_millis(500));
}
