//! Default budgets, overridable through the service's environment config.

use crate::retry::RetryConfig;
use std::time::Duration;

/// A radius query touches a few grid cells or one index scan
pub const PROXIMITY_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// One lifecycle effect: a purge or tombstone transaction plus its marker
pub const LIFECYCLE_HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishing an outbox row to the bus.
///
/// Four attempts within roughly a second; the outbox processor retries
/// across polls on top of this.
pub fn bus_publish() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(5),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}
