//! Proximity discovery and lifecycle propagation.
//!
//! - `geo`: radius lookup over live posts (in-process grid or PostgreSQL)
//! - `ledger`: which posts each viewer has seen
//! - `services`: proximity queries built on the two
//! - `bus` / `propagation`: lifecycle events through the outbox, the event
//!   bus and the idempotent consumer

pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod propagation;
pub mod repository;
pub mod services;
pub mod workers;

pub use config::Config;
pub use error::{ServiceError, ServiceResult};
