//! Transfer job snapshot persistence
//!
//! The in-memory registry is authoritative while a job runs; these rows let
//! status queries answer for jobs that finished before a restart.

use chrono::{DateTime, Utc};
use portal_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{JobStatus, TransferError, TransferFilters, TransferJob, TransferProgress};

/// Insert or update a job snapshot
pub async fn save_job(pool: &SqlitePool, job: &TransferJob) -> Result<()> {
    // Prepare all data before touching the database
    let status = serde_json::to_string(&job.status)
        .map_err(|e| Error::Internal(format!("Failed to serialize status: {}", e)))?;
    let filters = serde_json::to_string(&job.filters)
        .map_err(|e| Error::Internal(format!("Failed to serialize filters: {}", e)))?;
    let errors = serde_json::to_string(&job.errors)
        .map_err(|e| Error::Internal(format!("Failed to serialize errors: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO transfer_jobs (
            job_id, status, filters,
            progress_total, progress_completed, progress_failed, progress_current,
            errors, fatal_error, cancel_requested, created_at, started_at, ended_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id) DO UPDATE SET
            status = excluded.status,
            progress_total = excluded.progress_total,
            progress_completed = excluded.progress_completed,
            progress_failed = excluded.progress_failed,
            progress_current = excluded.progress_current,
            errors = excluded.errors,
            fatal_error = excluded.fatal_error,
            cancel_requested = excluded.cancel_requested,
            started_at = excluded.started_at,
            ended_at = excluded.ended_at
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(status)
    .bind(filters)
    .bind(job.progress.total as i64)
    .bind(job.progress.completed as i64)
    .bind(job.progress.failed as i64)
    .bind(job.progress.current as i64)
    .bind(errors)
    .bind(&job.fatal_error)
    .bind(job.cancel_requested)
    .bind(job.created_at.to_rfc3339())
    .bind(job.started_at.map(|dt| dt.to_rfc3339()))
    .bind(job.ended_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a job snapshot
pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<TransferJob>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, status, filters,
               progress_total, progress_completed, progress_failed, progress_current,
               errors, fatal_error, cancel_requested, created_at, started_at, ended_at
        FROM transfer_jobs
        WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.get("status");
    let status: JobStatus = serde_json::from_str(&status)
        .map_err(|e| Error::Internal(format!("Failed to deserialize status: {}", e)))?;

    let filters: String = row.get("filters");
    let filters: TransferFilters = serde_json::from_str(&filters)
        .map_err(|e| Error::Internal(format!("Failed to deserialize filters: {}", e)))?;

    let errors: String = row.get("errors");
    let errors: Vec<TransferError> = serde_json::from_str(&errors)
        .map_err(|e| Error::Internal(format!("Failed to deserialize errors: {}", e)))?;

    let created_at: String = row.get("created_at");
    let started_at: Option<String> = row.get("started_at");
    let ended_at: Option<String> = row.get("ended_at");

    Ok(Some(TransferJob {
        job_id,
        status,
        filters,
        progress: TransferProgress {
            total: row.get::<i64, _>("progress_total") as usize,
            completed: row.get::<i64, _>("progress_completed") as usize,
            failed: row.get::<i64, _>("progress_failed") as usize,
            current: row.get::<i64, _>("progress_current") as usize,
            current_label: None,
        },
        errors,
        fatal_error: row.get("fatal_error"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        started_at: started_at
            .map(|s| parse_timestamp(&s, "started_at"))
            .transpose()?,
        ended_at: ended_at.map(|s| parse_timestamp(&s, "ended_at")).transpose()?,
        cancel_requested: row.get("cancel_requested"),
    }))
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Mark jobs left non-terminal by a previous process as cancelled
///
/// A job's background task dies with its process, so such a job can
/// never progress again. Returns the number of jobs updated.
pub async fn cleanup_stale_jobs(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE transfer_jobs
        SET status = '"CANCELLED"',
            ended_at = ?,
            fatal_error = COALESCE(fatal_error, 'Transfer interrupted - service was restarted')
        WHERE status NOT IN ('"COMPLETED"', '"CANCELLED"', '"ERROR"')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}
