//! Transfer job type definitions
//!
//! Supporting types shared between the transfer orchestrator and the
//! event subscribers that render job progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transfer job lifecycle status
///
/// `Pending → Running → {Completed | Cancelled | Error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Created, background task not started yet
    Pending,
    /// Background task is driving the portal
    Running,
    /// Every selected record was processed
    Completed,
    /// Stopped at a record boundary on request
    Cancelled,
    /// Aborted by a fatal session error
    Error,
}

impl JobStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One per-record failure, appended to the job and never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferError {
    /// Key of the record that failed
    pub record_key: String,
    /// Human-readable record label
    pub label: String,
    /// Failure reason reported by the driver
    pub message: String,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// Final job summary, carried by the terminal event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub status: JobStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<TransferError>,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
}
