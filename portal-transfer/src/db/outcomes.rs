//! Per-record transfer outcome persistence
//!
//! Both writes are idempotent under retry of the same outcome, and safe for
//! concurrent jobs since each statement touches a single row by key.

use chrono::{DateTime, Utc};
use portal_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Stamp a record as transferred and clear any earlier error
///
/// Returns false when no record has this key.
pub async fn mark_transferred(
    pool: &SqlitePool,
    record_key: &str,
    transferred_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE counseling_sessions
        SET transferred_at = ?,
            transfer_error = NULL
        WHERE id = ?
        "#,
    )
    .bind(transferred_at.to_rfc3339())
    .bind(record_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Store a failure message and bump the retry counter
///
/// The counter moves at most once per (record, job): logging the same
/// job's failure again only refreshes the message.
pub async fn log_error(
    pool: &SqlitePool,
    record_key: &str,
    job_id: Uuid,
    message: &str,
) -> Result<bool> {
    let job = job_id.to_string();

    let result = sqlx::query(
        r#"
        UPDATE counseling_sessions
        SET transfer_error = ?,
            transfer_retry_count = transfer_retry_count
                + CASE WHEN last_transfer_job IS ? THEN 0 ELSE 1 END,
            last_transfer_job = ?
        WHERE id = ?
        "#,
    )
    .bind(message)
    .bind(&job)
    .bind(&job)
    .bind(record_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Transfer bookkeeping of one record
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TransferState {
    pub transferred_at: Option<String>,
    pub transfer_error: Option<String>,
    pub transfer_retry_count: i64,
}

/// Read back a record's transfer bookkeeping
pub async fn transfer_state(pool: &SqlitePool, record_key: &str) -> Result<Option<TransferState>> {
    let state = sqlx::query_as::<_, TransferState>(
        r#"
        SELECT transferred_at, transfer_error, transfer_retry_count
        FROM counseling_sessions
        WHERE id = ?
        "#,
    )
    .bind(record_key)
    .fetch_optional(pool)
    .await?;

    Ok(state)
}
