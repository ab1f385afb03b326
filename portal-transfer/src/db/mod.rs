//! Database access for portal-transfer
//!
//! SQLite holds the counseling session records the selector reads and the
//! outcome sink updates, persisted job snapshots, and runtime settings.

pub mod jobs;
pub mod outcomes;
pub mod records;
pub mod settings;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on a locked database before failing
///
/// Concurrent jobs share the records table through the outcome sink.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> portal_common::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Written by the counselor dashboard; this service only reads the
    // session columns and updates the transfer_* bookkeeping columns.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counseling_sessions (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            session_date TEXT NOT NULL,
            session_time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'completed',
            category TEXT NOT NULL,
            subcategory TEXT NOT NULL DEFAULT '',
            summary TEXT NOT NULL DEFAULT '',
            duration_minutes INTEGER NOT NULL DEFAULT 0,
            participant_count INTEGER NOT NULL DEFAULT 1,
            transferred_at TEXT,
            transfer_error TEXT,
            transfer_retry_count INTEGER NOT NULL DEFAULT 0,
            last_transfer_job TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfer_jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            filters TEXT NOT NULL,
            progress_total INTEGER NOT NULL DEFAULT 0,
            progress_completed INTEGER NOT NULL DEFAULT 0,
            progress_failed INTEGER NOT NULL DEFAULT 0,
            progress_current INTEGER NOT NULL DEFAULT 0,
            errors TEXT NOT NULL DEFAULT '[]',
            fatal_error TEXT,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, counseling_sessions, transfer_jobs)");

    Ok(())
}
