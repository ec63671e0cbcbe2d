//! Append-only task failure log
//!
//! Every failed attempt appends one record to the monitoring store; records
//! are never updated or deleted, so the table is the audit trail of what
//! failed, where, and on which attempt. Logging must never take down the
//! worker: a failed insert is reported through tracing and swallowed.

use sqlx::SqlitePool;
use tracing::{error, warn};

/// Status value recorded for a failed attempt
pub const FAILED_STATUS: i32 = -1;

/// One failure log entry
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// Identity of the worker that processed the attempt
    pub worker: String,
    /// Delivery id of the failed attempt
    pub task_id: String,
    /// Short error message
    pub message: String,
    /// Expanded error detail
    pub detail: String,
    /// Dataset name the task targeted
    pub args: String,
    /// Task parameters, JSON-encoded
    pub kwargs: String,
    /// Attempt counter at the time of failure
    pub retry: u32,
    /// Outcome status code
    pub status: i32,
}

/// Create the failure log table if it does not exist
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), crate::store::StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS task_failure_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            retry INTEGER NOT NULL,
            status INTEGER NOT NULL,
            worker TEXT NOT NULL,
            task_id TEXT NOT NULL,
            msg TEXT NOT NULL,
            info TEXT NOT NULL,
            args TEXT NOT NULL,
            kwargs TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Append one failure record.
///
/// The operational log line is emitted unconditionally; a monitoring store
/// outage therefore degrades the audit trail but never the retry flow.
pub async fn record(pool: &SqlitePool, failure: &FailureRecord) {
    error!(
        worker = %failure.worker,
        task_id = %failure.task_id,
        retry = failure.retry,
        message = %failure.message,
        "task attempt failed"
    );

    let result = sqlx::query(
        "INSERT INTO task_failure_log (retry, status, worker, task_id, msg, info, args, kwargs)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(failure.retry as i64)
    .bind(failure.status as i64)
    .bind(&failure.worker)
    .bind(&failure.task_id)
    .bind(&failure.message)
    .bind(&failure.detail)
    .bind(&failure.args)
    .bind(&failure.kwargs)
    .execute(pool)
    .await;

    if let Err(err) = result {
        warn!(error = %err, "failed to append failure record");
    }
}
