//! Record selection
//!
//! The orchestrator asks a [`RecordSelector`] for the records of a job; the
//! SQLite implementation reads the `counseling_sessions` table.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::records;
use crate::models::{TransferFilters, TransferRecord};

/// Source of records eligible for transfer
#[async_trait]
pub trait RecordSelector: Send + Sync {
    /// Records matching `filters`, ordered by date, then time
    async fn select(&self, filters: &TransferFilters) -> portal_common::Result<Vec<TransferRecord>>;
}

/// Selects completed counseling sessions from SQLite
#[derive(Clone)]
pub struct SqliteRecordSelector {
    db: SqlitePool,
}

impl SqliteRecordSelector {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordSelector for SqliteRecordSelector {
    async fn select(&self, filters: &TransferFilters) -> portal_common::Result<Vec<TransferRecord>> {
        let records = records::select_eligible(&self.db, filters).await?;
        tracing::debug!(
            count = records.len(),
            only_not_transferred = filters.only_not_transferred,
            "Selected records for transfer"
        );
        Ok(records)
    }
}
