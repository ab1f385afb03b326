//! Event types for the transfer event system
//!
//! Provides the typed job events and the EventBus used to fan them out.
//! One broadcast channel carries every job's events; subscribers pick
//! their job with [`EventBus::subscribe_job`].

mod transfer_types;

pub use transfer_types::{JobStatus, TransferError, TransferSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// A single event published for one transfer job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Job the event belongs to
    pub job_id: Uuid,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    /// Event body
    #[serde(flatten)]
    pub kind: TransferEventKind,
}

/// Typed event bodies
///
/// Per job the order is: status and progress events while running, then
/// exactly one terminal event (`TransferCompleted` or `TransferError`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransferEventKind {
    /// Lifecycle status changed or the job entered a new setup step
    Status {
        status: JobStatus,
        message: String,
    },

    /// Aggregate counters, published once at start and after every record
    Progress {
        total: usize,
        completed: usize,
        failed: usize,
        current: usize,
    },

    /// The driver began entering a record
    RecordStarted {
        record_key: String,
        label: String,
    },

    /// The portal accepted a record
    RecordCompleted {
        record_key: String,
    },

    /// The record failed; the batch continues
    RecordFailed {
        record_key: String,
        error: String,
    },

    /// Terminal event for `Completed` and `Cancelled` jobs
    TransferCompleted {
        summary: TransferSummary,
    },

    /// Terminal event for jobs that ended in `Error`
    TransferError {
        error: String,
        summary: TransferSummary,
    },
}

impl TransferEventKind {
    /// Event type as string, used as the SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            TransferEventKind::Status { .. } => "status",
            TransferEventKind::Progress { .. } => "progress",
            TransferEventKind::RecordStarted { .. } => "record-started",
            TransferEventKind::RecordCompleted { .. } => "record-completed",
            TransferEventKind::RecordFailed { .. } => "record-failed",
            TransferEventKind::TransferCompleted { .. } => "transfer-completed",
            TransferEventKind::TransferError { .. } => "transfer-error",
        }
    }

    /// Whether this is the last event a job will ever publish
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEventKind::TransferCompleted { .. } | TransferEventKind::TransferError { .. }
        )
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for transfer jobs
///
/// Uses `tokio::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block the orchestrator)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use portal_common::events::{EventBus, JobStatus, TransferEventKind};
/// use uuid::Uuid;
///
/// let event_bus = EventBus::new(100);
/// let job_id = Uuid::new_v4();
/// let _subscription = event_bus.subscribe_job(job_id);
///
/// event_bus.publish(job_id, TransferEventKind::Status {
///     status: JobStatus::Running,
///     message: "Transfer started".to_string(),
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransferEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before
    /// the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events of one job
    ///
    /// Events published before subscription are not received, so callers
    /// that must see every event subscribe before starting the job (the
    /// job id may be supplied by the caller for this reason).
    pub fn subscribe_job(&self, job_id: Uuid) -> JobSubscription {
        JobSubscription {
            job_id,
            rx: self.tx.subscribe(),
        }
    }

    /// Publish an event for a job, ignoring if nobody is listening
    ///
    /// The orchestrator never knows who (if anyone) subscribes.
    pub fn publish(&self, job_id: Uuid, kind: TransferEventKind) {
        let _ = self.tx.send(TransferEvent {
            job_id,
            timestamp: Utc::now(),
            kind,
        });
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Receiver filtered to the events of a single job
pub struct JobSubscription {
    job_id: Uuid,
    rx: broadcast::Receiver<TransferEvent>,
}

impl JobSubscription {
    /// Job this subscription follows
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Wait for the next event of this job
    ///
    /// Returns `None` once the bus is dropped. Lagged events are skipped
    /// with a warning; the stream keeps going.
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.job_id == self.job_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        skipped,
                        "Job subscriber lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
