//! Transfer service facade
//!
//! Start, query, cancel and list jobs. Start returns as soon as the job is
//! registered; the run itself is a background task.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RuntimeSettings;
use crate::db::jobs;
use crate::models::{JobStatus, TransferFilters, TransferJob, TransferSummary};
use crate::services::driver::DriverFactory;
use crate::services::job_registry::{JobHandle, JobRegistry};
use crate::services::orchestrator::TransferOrchestrator;
use crate::services::record_selector::RecordSelector;

/// Transfer service errors
#[derive(Debug, Error)]
pub enum TransferServiceError {
    /// No record matched the filters; no session was started
    #[error("Nothing to transfer: no eligible records match the filters")]
    NothingToTransfer,

    #[error("Transfer job already exists: {0}")]
    DuplicateJob(Uuid),

    #[error("Transfer job not found: {0}")]
    NotFound(Uuid),

    #[error("Transfer job {job_id} already finished with status {status}")]
    AlreadyFinished { job_id: Uuid, status: JobStatus },

    /// The service is shutting down and accepts no new jobs
    #[error("Transfer service is shutting down")]
    ShuttingDown,

    #[error("Record selection failed: {0}")]
    Selection(portal_common::Error),

    #[error(transparent)]
    Storage(#[from] portal_common::Error),
}

/// A job that was accepted and is running in the background
pub struct StartedJob {
    pub job_id: Uuid,
    /// Number of selected records
    pub total: usize,
    /// Background run; resolves to the final summary
    pub task: JoinHandle<TransferSummary>,
}

/// Finished jobs kept in memory; older ones are served from the database
pub const DEFAULT_FINISHED_JOBS_RETAINED: usize = 50;

/// Entry point for starting and supervising transfer jobs
pub struct TransferService {
    db: SqlitePool,
    registry: JobRegistry,
    selector: Arc<dyn RecordSelector>,
    drivers: Arc<dyn DriverFactory>,
    orchestrator: Arc<TransferOrchestrator>,
    tasks: TaskTracker,
    finished_retained: usize,
}

impl TransferService {
    pub fn new(
        db: SqlitePool,
        registry: JobRegistry,
        selector: Arc<dyn RecordSelector>,
        drivers: Arc<dyn DriverFactory>,
        orchestrator: TransferOrchestrator,
    ) -> Self {
        Self {
            db,
            registry,
            selector,
            drivers,
            orchestrator: Arc::new(orchestrator),
            tasks: TaskTracker::new(),
            finished_retained: DEFAULT_FINISHED_JOBS_RETAINED,
        }
    }

    /// How many finished jobs stay in the registry
    pub fn with_finished_retention(mut self, retained: usize) -> Self {
        self.finished_retained = retained;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Select records and start a job over them
    ///
    /// Fails fast with [`TransferServiceError::NothingToTransfer`] when no
    /// record is eligible; in that case no job exists afterwards.
    pub async fn start_job(
        &self,
        job_id: Option<Uuid>,
        filters: TransferFilters,
    ) -> Result<StartedJob, TransferServiceError> {
        let job_id = job_id.unwrap_or_else(Uuid::new_v4);

        if self.tasks.is_closed() {
            return Err(TransferServiceError::ShuttingDown);
        }

        if self.registry.contains(job_id).await || jobs::load_job(&self.db, job_id).await?.is_some() {
            return Err(TransferServiceError::DuplicateJob(job_id));
        }

        let records = self
            .selector
            .select(&filters)
            .await
            .map_err(TransferServiceError::Selection)?;

        if records.is_empty() {
            info!(job_id = %job_id, "Nothing to transfer, job not started");
            return Err(TransferServiceError::NothingToTransfer);
        }

        let settings = RuntimeSettings::load(&self.db).await?;

        let total = records.len();
        let handle = JobHandle::new(TransferJob::new(job_id, filters, total));
        if !self.registry.insert(handle.clone()).await {
            return Err(TransferServiceError::DuplicateJob(job_id));
        }

        let driver = self.drivers.create(job_id, &settings);
        let orchestrator = Arc::clone(&self.orchestrator);
        let registry = self.registry.clone();
        let retained = self.finished_retained;

        let task = self.tasks.spawn(async move {
            tracing::info!(job_id = %job_id, "Background transfer task started");
            let summary = orchestrator.run(handle, records, driver).await;

            let evicted = registry.evict_finished(retained).await;
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted finished jobs from registry");
            }
            summary
        });

        info!(job_id = %job_id, total, "Transfer job accepted");

        Ok(StartedJob { job_id, total, task })
    }

    /// Current snapshot of a job
    ///
    /// Jobs not in the registry (finished before a restart) are read from
    /// the database.
    pub async fn status(&self, job_id: Uuid) -> Result<Option<TransferJob>, TransferServiceError> {
        if let Some(handle) = self.registry.get(job_id).await {
            return Ok(Some(handle.snapshot().await));
        }
        Ok(jobs::load_job(&self.db, job_id).await?)
    }

    /// Request cooperative cancellation
    ///
    /// The in-flight record finishes first; the returned snapshot shows the
    /// job as it was when the request was accepted.
    pub async fn cancel(&self, job_id: Uuid) -> Result<TransferJob, TransferServiceError> {
        let Some(handle) = self.registry.get(job_id).await else {
            return match jobs::load_job(&self.db, job_id).await? {
                Some(job) => Err(TransferServiceError::AlreadyFinished {
                    job_id,
                    status: job.status,
                }),
                None => Err(TransferServiceError::NotFound(job_id)),
            };
        };

        if !handle.request_cancel().await {
            let status = handle.snapshot().await.status;
            return Err(TransferServiceError::AlreadyFinished { job_id, status });
        }

        info!(job_id = %job_id, "Transfer cancellation requested");
        Ok(handle.snapshot().await)
    }

    /// Jobs started by this process, most recent first
    ///
    /// Only the most recent finished jobs are kept in memory.
    pub async fn list_jobs(&self) -> Vec<TransferJob> {
        self.registry.snapshots().await
    }

    /// Stop accepting jobs, cancel running ones and wait for them to finish
    ///
    /// Running jobs stop at their next record boundary (or at once while
    /// waiting for the login handshake) and close their browser session.
    /// Returns false if some job was still running when `grace` elapsed.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tasks.close();

        let mut cancelled = 0;
        for handle in self.registry.handles().await {
            if handle.request_cancel().await {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(jobs = cancelled, "Cancelling running transfer jobs for shutdown");
        }

        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tasks.len(),
                    grace_s = grace.as_secs(),
                    "Transfer jobs still running at shutdown deadline"
                );
                false
            }
        }
    }
}
