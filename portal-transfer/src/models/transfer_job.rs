//! Transfer job state machine
//!
//! `PENDING → RUNNING → {COMPLETED | CANCELLED | ERROR}`
//!
//! A job reaches exactly one terminal state and is read-only afterwards.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobStatus, TransferError, TransferSummary};

/// Record selection filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFilters {
    /// Restrict selection to these record keys
    #[serde(default)]
    pub record_ids: Option<Vec<String>>,
    /// Skip records that already carry a transfer timestamp
    #[serde(default = "default_only_not_transferred")]
    pub only_not_transferred: bool,
    /// Inclusive lower bound on the session date
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound on the session date
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn default_only_not_transferred() -> bool {
    true
}

impl Default for TransferFilters {
    fn default() -> Self {
        Self {
            record_ids: None,
            only_not_transferred: true,
            start_date: None,
            end_date: None,
        }
    }
}

/// Status change record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Per-job counters
///
/// `completed + failed <= total` at all times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// 1-based position of the record being processed, 0 before the first
    pub current: usize,
    /// Label of the record being processed
    #[serde(default)]
    pub current_label: Option<String>,
}

impl TransferProgress {
    /// Percentage of records finished (0.0 - 100.0)
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            ((self.completed + self.failed) as f64 / self.total as f64) * 100.0
        }
    }
}

/// One batch run over a set of records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub filters: TransferFilters,
    pub progress: TransferProgress,
    /// Per-record failures; length always equals `progress.failed`
    pub errors: Vec<TransferError>,
    /// Fatal error message when status is `Error`
    #[serde(default)]
    pub fatal_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
}

impl TransferJob {
    /// Create a pending job for `total` selected records
    pub fn new(job_id: Uuid, filters: TransferFilters, total: usize) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            filters,
            progress: TransferProgress {
                total,
                ..TransferProgress::default()
            },
            errors: Vec::new(),
            fatal_error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            cancel_requested: false,
        }
    }

    /// Transition to a new status
    ///
    /// Returns `None` (and changes nothing) once the job is terminal.
    pub fn transition_to(&mut self, new_status: JobStatus) -> Option<StateTransition> {
        if self.status.is_terminal() {
            tracing::warn!(
                job_id = %self.job_id,
                status = %self.status,
                requested = %new_status,
                "Ignoring transition of terminal job"
            );
            return None;
        }

        let now = Utc::now();
        let transition = StateTransition {
            job_id: self.job_id,
            old_status: self.status,
            new_status,
            transitioned_at: now,
        };
        self.status = new_status;

        match new_status {
            JobStatus::Running => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Error => {
                self.ended_at = Some(now);
                self.progress.current_label = None;
            }
            JobStatus::Pending => {}
        }

        Some(transition)
    }

    /// Mark the record at 1-based `position` as in flight
    pub fn begin_record(&mut self, position: usize, label: &str) {
        self.progress.current = position.min(self.progress.total);
        self.progress.current_label = Some(label.to_string());
    }

    /// Count a record the portal accepted
    pub fn record_success(&mut self) {
        if self.progress.completed + self.progress.failed < self.progress.total {
            self.progress.completed += 1;
        }
    }

    /// Count a failed record and keep its error
    pub fn record_failure(&mut self, error: TransferError) {
        if self.progress.completed + self.progress.failed < self.progress.total {
            self.progress.failed += 1;
            self.errors.push(error);
        }
    }

    /// Request cooperative cancellation; no effect on terminal jobs
    pub fn request_cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds since the run started (or since creation while pending)
    pub fn elapsed_seconds(&self) -> u64 {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - start).num_seconds().max(0) as u64
    }

    /// Summary carried by the terminal event
    pub fn summary(&self, duration_ms: u64) -> TransferSummary {
        TransferSummary {
            status: self.status,
            total: self.progress.total,
            completed: self.progress.completed,
            failed: self.progress.failed,
            errors: self.errors.clone(),
            duration_ms,
        }
    }
}
