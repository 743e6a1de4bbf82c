//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking.
//! Supports SQLite and, with the `postgres` feature, PostgreSQL.

pub mod combination;
pub mod context;
pub mod diesel_models;
pub mod pool;
pub mod util;

pub use combination::{CombinationRepository, RepositoryError, StatisticsQuery};
pub use context::DbContext;
pub use pool::{DbError, DbPool};

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
