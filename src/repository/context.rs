//! Database context for managing connections and repository access.
//!
//! The DbContext is the primary entry point for all database operations.
//! It holds the connection pool and hands out repositories.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::combination::CombinationRepository;
use super::pool::{DbError, DbPool};

/// Database context that manages the connection pool and provides repository access.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:admissions.db")?;
/// ctx.init_schema().await?;
/// let total = ctx.combinations().count().await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a context from a database file path (SQLite only).
    pub fn from_path(db_path: &Path) -> Self {
        Self::new(DbPool::sqlite_from_path(db_path))
    }

    /// Create a context from a database URL.
    ///
    /// Supports:
    /// - SQLite: file paths or `sqlite:` URLs
    /// - PostgreSQL: `postgres://` or `postgresql://` URLs (with the `postgres` feature)
    pub fn from_url(url: &str) -> Result<Self, DbError> {
        Ok(Self::new(DbPool::from_url(url)?))
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Get a combination repository.
    pub fn combinations(&self) -> CombinationRepository {
        CombinationRepository::new(self.pool.clone())
    }

    /// Initialize database schema. Safe to run repeatedly.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        crate::with_conn_split!(self.pool,
            sqlite: conn => {
                init_sqlite_schema(&mut conn).await
            },
            postgres: conn => {
                init_postgres_schema(&mut conn).await
            }
        )
    }
}

async fn init_sqlite_schema(conn: &mut super::pool::SqliteConn) -> Result<(), DbError> {
    conn.batch_execute(include_str!("schema_sqlite.sql")).await
}

#[cfg(feature = "postgres")]
async fn init_postgres_schema(conn: &mut diesel_async::AsyncPgConnection) -> Result<(), DbError> {
    use diesel_async::RunQueryDsl;

    // PostgreSQL needs statements executed separately
    let script: String = include_str!("schema_postgres.sql")
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    for stmt in script.split(';') {
        let stmt = stmt.trim();
        if !stmt.is_empty() {
            diesel::sql_query(stmt).execute(conn).await?;
        }
    }
    Ok(())
}
