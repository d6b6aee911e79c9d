//! Retry and timeout helpers for the discovery service's boundaries.
//!
//! Publishing a lifecycle event retries through [`with_retry`] with the
//! [`presets::bus_publish`] policy. Proximity queries and consumer effects
//! run under [`with_timeout`]; the default budgets live in [`presets`].
//!
//! ```rust,no_run
//! use resilience::{presets, with_retry};
//!
//! # async fn send() -> Result<(), String> { Ok(()) }
//! # async fn run() {
//! let delivered = with_retry(presets::bus_publish(), || send()).await;
//! # }
//! ```

pub mod presets;
pub mod retry;
pub mod timeout;

pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout, TimeoutError};
