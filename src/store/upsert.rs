//! Conflict-safe row writer
//!
//! Writing is two-phase. The fast path bulk-inserts the whole row set in one
//! transaction, which succeeds whenever no key collides. If it fails for any
//! reason the writer falls back to row-level upserts, also in one
//! transaction, where a key collision updates the existing row column by
//! column under the sparse-update rule: an incoming empty string never
//! overwrites a stored value.
//!
//! Table and column names are validated before being spliced into SQL; all
//! cell values travel as bound parameters.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, error, warn};

use crate::store::StoreError;
use crate::RowSet;

/// Rows per bulk INSERT statement, keeping the bind count well under the
/// SQLite parameter limit
const BULK_CHUNK_ROWS: usize = 500;

/// Write a row set into `table`, resolving key collisions on `key_columns`.
///
/// Returns the number of rows handed to the database. An empty row set is a
/// successful no-op.
pub async fn write(
    pool: &SqlitePool,
    table: &str,
    key_columns: &[String],
    rows: &RowSet,
) -> Result<usize, StoreError> {
    if rows.is_empty() {
        return Ok(0);
    }
    validate_identifier(table)?;
    for column in rows.columns() {
        validate_identifier(column)?;
    }
    for key in key_columns {
        validate_identifier(key)?;
    }

    match bulk_insert(pool, table, rows).await {
        Ok(count) => {
            debug!(table, count, "bulk insert succeeded");
            return Ok(count);
        }
        Err(err) => {
            warn!(table, error = %err, "bulk insert failed, falling back to row-level upsert");
        }
    }

    match upsert_rows(pool, table, key_columns, rows).await {
        Ok(count) => Ok(count),
        Err(err) => {
            error!(table, error = %err, "row-level upsert failed, transaction rolled back");
            Err(err)
        }
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn validate_identifier(identifier: &str) -> Result<(), StoreError> {
    let valid = !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(identifier.to_string()))
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `ON CONFLICT` tail implementing the sparse-update rule. Non-key columns
/// keep their stored value whenever the incoming value is the empty string.
fn conflict_clause(table: &str, columns: &[String], key_columns: &[String]) -> String {
    let keys = column_list(key_columns);
    let updates: Vec<String> = columns
        .iter()
        .filter(|column| !key_columns.contains(column))
        .map(|column| {
            let target = quote(table);
            let col = quote(column);
            format!("{col} = CASE WHEN excluded.{col} = '' THEN {target}.{col} ELSE excluded.{col} END")
        })
        .collect();

    if updates.is_empty() {
        format!(" ON CONFLICT({keys}) DO NOTHING")
    } else {
        format!(" ON CONFLICT({keys}) DO UPDATE SET {}", updates.join(", "))
    }
}

async fn bulk_insert(pool: &SqlitePool, table: &str, rows: &RowSet) -> Result<usize, StoreError> {
    let prefix = format!(
        "INSERT INTO {} ({}) ",
        quote(table),
        column_list(rows.columns())
    );

    let mut tx = pool.begin().await?;
    for chunk in rows.rows().chunks(BULK_CHUNK_ROWS) {
        let mut builder = QueryBuilder::<Sqlite>::new(&prefix);
        builder.push_values(chunk, |mut binder, row| {
            for value in row {
                binder.push_bind(value.as_str());
            }
        });
        builder.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}

async fn upsert_rows(
    pool: &SqlitePool,
    table: &str,
    key_columns: &[String],
    rows: &RowSet,
) -> Result<usize, StoreError> {
    let prefix = format!(
        "INSERT INTO {} ({}) ",
        quote(table),
        column_list(rows.columns())
    );
    let conflict = conflict_clause(table, rows.columns(), key_columns);

    let mut tx = pool.begin().await?;
    for row in rows.rows() {
        let mut builder = QueryBuilder::<Sqlite>::new(&prefix);
        builder.push_values(std::iter::once(row), |mut binder, row| {
            for value in row {
                binder.push_bind(value.as_str());
            }
        });
        builder.push(&conflict);
        builder.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}
