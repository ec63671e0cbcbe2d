//! Persistence layer
//!
//! Two stores back the engine: the primary data store holding dataset tables
//! and a monitoring store holding the failure log. Both are reached through a
//! [`ConnectionGuardian`] that probes liveness before every use and
//! reconnects on failure.

pub mod failure_log;
pub mod guardian;
pub mod upsert;

pub use failure_log::FailureRecord;
pub use guardian::ConnectionGuardian;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A table or column name failed validation before being spliced into SQL
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A liveness probe failed
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Open a pool against the given database URL.
///
/// The pool holds a single connection so in-memory databases stay coherent
/// across checkouts.
pub async fn connect(url: &str) -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await?;
    Ok(pool)
}
