//! Transfer orchestrator
//!
//! # State progression
//! PENDING → RUNNING → {COMPLETED | CANCELLED | ERROR}
//!
//! A run has three parts:
//! - **Setup**: launch the session, wait for the human login handshake,
//!   click through to the entry form. Any failure here is fatal.
//! - **Record loop**: one record at a time in selection order. Business
//!   failures are recorded and the loop continues; a session failure ends
//!   the job. Cancellation is observed between records only.
//! - **Teardown**: the driver is closed on every path, then the terminal
//!   event is published. It is always the job's last event.

use chrono::Utc;
use portal_common::events::{EventBus, TransferEventKind};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::db::jobs;
use crate::models::{JobStatus, TransferError, TransferRecord, TransferSummary};
use crate::services::driver::{PortalDriver, SubmitOutcome};
use crate::services::job_registry::JobHandle;
use crate::services::outcome_sink::OutcomeSink;

/// How the setup and record loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl RunOutcome {
    fn status(&self) -> JobStatus {
        match self {
            RunOutcome::Completed => JobStatus::Completed,
            RunOutcome::Cancelled => JobStatus::Cancelled,
            RunOutcome::Failed(_) => JobStatus::Error,
        }
    }
}

/// Runs transfer jobs against a portal driver
pub struct TransferOrchestrator {
    event_bus: EventBus,
    sink: Arc<dyn OutcomeSink>,
    /// Job snapshots are saved here when set
    db: Option<SqlitePool>,
}

impl TransferOrchestrator {
    pub fn new(event_bus: EventBus, sink: Arc<dyn OutcomeSink>) -> Self {
        Self {
            event_bus,
            sink,
            db: None,
        }
    }

    /// Persist job snapshots to the `transfer_jobs` table
    pub fn with_job_store(mut self, db: SqlitePool) -> Self {
        self.db = Some(db);
        self
    }

    /// Run one job to its terminal state
    ///
    /// Takes ownership of the driver; it is closed exactly once before the
    /// terminal event is published.
    pub async fn run(
        &self,
        handle: JobHandle,
        records: Vec<TransferRecord>,
        mut driver: Box<dyn PortalDriver>,
    ) -> TransferSummary {
        let job_id = handle.job_id();
        let started = Instant::now();

        info!(job_id = %job_id, records = records.len(), "Transfer job started");

        let outcome = self.drive(&handle, &records, driver.as_mut()).await;
        let status = outcome.status();

        let message = match &outcome {
            RunOutcome::Completed => "Transfer completed".to_string(),
            RunOutcome::Cancelled => "Transfer cancelled".to_string(),
            RunOutcome::Failed(reason) => reason.clone(),
        };

        handle
            .update(|job| {
                job.transition_to(status);
                if let RunOutcome::Failed(reason) = &outcome {
                    job.fatal_error = Some(reason.clone());
                }
            })
            .await;
        self.publish_status(&handle, status, &message);

        driver.close().await;
        drop(driver);

        let snapshot = handle.snapshot().await;
        let summary = snapshot.summary(started.elapsed().as_millis() as u64);
        self.persist(&handle).await;

        info!(
            job_id = %job_id,
            status = %status,
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "Transfer job finished"
        );

        let terminal = match outcome {
            RunOutcome::Failed(reason) => TransferEventKind::TransferError {
                error: reason,
                summary: summary.clone(),
            },
            RunOutcome::Completed | RunOutcome::Cancelled => TransferEventKind::TransferCompleted {
                summary: summary.clone(),
            },
        };
        self.event_bus.publish(job_id, terminal);

        summary
    }

    async fn drive(
        &self,
        handle: &JobHandle,
        records: &[TransferRecord],
        driver: &mut dyn PortalDriver,
    ) -> RunOutcome {
        handle
            .update(|job| {
                job.transition_to(JobStatus::Running);
            })
            .await;
        self.publish_status(handle, JobStatus::Running, "Transfer started");
        self.publish_progress(handle).await;
        self.persist(handle).await;

        if handle.is_cancel_requested() {
            return RunOutcome::Cancelled;
        }

        if let Err(outcome) = self.setup(handle, driver).await {
            return outcome;
        }

        for (index, record) in records.iter().enumerate() {
            if handle.is_cancel_requested() {
                info!(
                    job_id = %handle.job_id(),
                    processed = index,
                    remaining = records.len() - index,
                    "Cancellation observed, stopping before next record"
                );
                return RunOutcome::Cancelled;
            }

            if let Err(reason) = self.process_record(handle, index + 1, record, driver).await {
                return RunOutcome::Failed(reason);
            }

            self.publish_progress(handle).await;
            self.persist(handle).await;
        }

        RunOutcome::Completed
    }

    /// Launch, log in and reach the entry form
    async fn setup(&self, handle: &JobHandle, driver: &mut dyn PortalDriver) -> Result<(), RunOutcome> {
        let job_id = handle.job_id();

        self.publish_status(handle, JobStatus::Running, "Launching browser session");
        driver.initialize().await.map_err(|e| {
            error!(job_id = %job_id, error = %e, "Browser launch failed");
            RunOutcome::Failed(e.to_string())
        })?;

        self.publish_status(handle, JobStatus::Running, "Awaiting login handshake");
        tokio::select! {
            result = driver.authenticate() => result.map_err(|e| {
                error!(job_id = %job_id, error = %e, "Portal login failed");
                RunOutcome::Failed(e.to_string())
            })?,
            _ = handle.cancel_token().cancelled() => {
                info!(job_id = %job_id, "Cancelled while waiting for login handshake");
                return Err(RunOutcome::Cancelled);
            }
        }

        self.publish_status(handle, JobStatus::Running, "Logged in, opening entry form");
        driver.navigate_to_entry_point().await.map_err(|e| {
            error!(job_id = %job_id, error = %e, "Navigation to entry form failed");
            RunOutcome::Failed(e.to_string())
        })?;

        self.publish_status(handle, JobStatus::Running, "Entering records");
        Ok(())
    }

    /// Submit one record and report its outcome
    ///
    /// `Err` carries the fatal reason when the session broke.
    async fn process_record(
        &self,
        handle: &JobHandle,
        position: usize,
        record: &TransferRecord,
        driver: &mut dyn PortalDriver,
    ) -> Result<(), String> {
        let job_id = handle.job_id();

        handle.update(|job| job.begin_record(position, &record.label)).await;
        self.event_bus.publish(
            job_id,
            TransferEventKind::RecordStarted {
                record_key: record.key.clone(),
                label: record.label.clone(),
            },
        );

        match driver.submit_record(record).await {
            Ok(SubmitOutcome::Submitted) => {
                handle.update(|job| job.record_success()).await;

                if let Err(e) = self.sink.mark_transferred(&record.key, Utc::now()).await {
                    warn!(job_id = %job_id, record_key = %record.key, error = %e, "Failed to mark record transferred");
                }

                info!(job_id = %job_id, record_key = %record.key, position, "Record transferred");
                self.event_bus.publish(
                    job_id,
                    TransferEventKind::RecordCompleted {
                        record_key: record.key.clone(),
                    },
                );
                Ok(())
            }
            Ok(SubmitOutcome::Rejected { reason }) => {
                let failure = TransferError {
                    record_key: record.key.clone(),
                    label: record.label.clone(),
                    message: reason.clone(),
                    timestamp: Utc::now(),
                };
                handle.update(|job| job.record_failure(failure)).await;

                if let Err(e) = self.sink.log_error(&record.key, job_id, &reason).await {
                    warn!(job_id = %job_id, record_key = %record.key, error = %e, "Failed to log record error");
                }

                warn!(job_id = %job_id, record_key = %record.key, reason = %reason, "Record failed");
                self.event_bus.publish(
                    job_id,
                    TransferEventKind::RecordFailed {
                        record_key: record.key.clone(),
                        error: reason,
                    },
                );
                Ok(())
            }
            Err(e) => {
                error!(job_id = %job_id, record_key = %record.key, error = %e, "Session failed during record");
                Err(format!("Session failed while transferring {}: {}", record.label, e))
            }
        }
    }

    fn publish_status(&self, handle: &JobHandle, status: JobStatus, message: &str) {
        self.event_bus.publish(
            handle.job_id(),
            TransferEventKind::Status {
                status,
                message: message.to_string(),
            },
        );
    }

    async fn publish_progress(&self, handle: &JobHandle) {
        let progress = handle.snapshot().await.progress;
        self.event_bus.publish(
            handle.job_id(),
            TransferEventKind::Progress {
                total: progress.total,
                completed: progress.completed,
                failed: progress.failed,
                current: progress.current,
            },
        );
    }

    async fn persist(&self, handle: &JobHandle) {
        let Some(db) = &self.db else {
            return;
        };

        let snapshot = handle.snapshot().await;
        if let Err(e) = jobs::save_job(db, &snapshot).await {
            warn!(job_id = %snapshot.job_id, error = %e, "Failed to save job snapshot");
        }
    }
}
