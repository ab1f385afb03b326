//! Per-record outcome persistence
//!
//! The sink is the only resource shared between concurrent jobs. Writes
//! are keyed by record and idempotent under retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::outcomes;

/// Where the orchestrator reports record outcomes
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Stamp the record as transferred
    async fn mark_transferred(
        &self,
        record_key: &str,
        transferred_at: DateTime<Utc>,
    ) -> portal_common::Result<()>;

    /// Store the failure and bump the record's retry counter once per job
    async fn log_error(
        &self,
        record_key: &str,
        job_id: Uuid,
        message: &str,
    ) -> portal_common::Result<()>;
}

/// Writes outcomes to the `counseling_sessions` table
#[derive(Clone)]
pub struct SqliteOutcomeSink {
    db: SqlitePool,
}

impl SqliteOutcomeSink {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OutcomeSink for SqliteOutcomeSink {
    async fn mark_transferred(
        &self,
        record_key: &str,
        transferred_at: DateTime<Utc>,
    ) -> portal_common::Result<()> {
        if !outcomes::mark_transferred(&self.db, record_key, transferred_at).await? {
            tracing::warn!(record_key = %record_key, "No record to mark as transferred");
        }
        Ok(())
    }

    async fn log_error(
        &self,
        record_key: &str,
        job_id: Uuid,
        message: &str,
    ) -> portal_common::Result<()> {
        if !outcomes::log_error(&self.db, record_key, job_id, message).await? {
            tracing::warn!(record_key = %record_key, "No record to log transfer error on");
        }
        Ok(())
    }
}
