//! PostgreSQL repositories (system of record).

pub mod accounts;
pub mod posts;
pub mod views;

pub use accounts::PgAccountRepository;
pub use posts::PgPostRepository;
pub use views::PgViewLedger;
