//! Registry of transfer jobs owned by the host process
//!
//! Handed to the service and the HTTP layer by handle; there is no global
//! job table.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::TransferJob;

/// Shared handle to one job
///
/// The orchestrator is the only writer of the job while it runs; other
/// holders read snapshots and may request cancellation.
#[derive(Clone)]
pub struct JobHandle {
    job_id: Uuid,
    job: Arc<RwLock<TransferJob>>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn new(job: TransferJob) -> Self {
        Self {
            job_id: job.job_id,
            job: Arc::new(RwLock::new(job)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Copy of the job's current state
    pub async fn snapshot(&self) -> TransferJob {
        self.job.read().await.clone()
    }

    /// Mutate the job under its write lock
    pub async fn update<R>(&self, f: impl FnOnce(&mut TransferJob) -> R) -> R {
        let mut job = self.job.write().await;
        f(&mut job)
    }

    /// Ask the job to stop at the next record boundary
    ///
    /// Returns false if the job already reached a terminal state.
    pub async fn request_cancel(&self) -> bool {
        let accepted = self.job.write().await.request_cancel();
        if accepted {
            self.cancel.cancel();
        }
        accepted
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that fires on the first cancellation request
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// In-memory table of jobs started by this process
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, JobHandle>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job; returns false if the id is already taken
    pub async fn insert(&self, handle: JobHandle) -> bool {
        match self.jobs.write().await.entry(handle.job_id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    pub async fn contains(&self, job_id: Uuid) -> bool {
        self.jobs.read().await.contains_key(&job_id)
    }

    pub async fn get(&self, job_id: Uuid) -> Option<JobHandle> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn handles(&self) -> Vec<JobHandle> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Drop the oldest finished jobs beyond the `keep` most recent
    ///
    /// Jobs still running are never evicted. Returns how many were removed.
    pub async fn evict_finished(&self, keep: usize) -> usize {
        let mut finished = Vec::new();
        for handle in self.handles().await {
            let job = handle.snapshot().await;
            if job.is_terminal() {
                finished.push((job.ended_at.unwrap_or(job.created_at), job.job_id));
            }
        }

        if finished.len() <= keep {
            return 0;
        }
        finished.sort_by(|a, b| b.0.cmp(&a.0));

        let mut jobs = self.jobs.write().await;
        finished[keep..]
            .iter()
            .filter(|(_, job_id)| jobs.remove(job_id).is_some())
            .count()
    }

    /// Snapshots of every registered job, most recent first
    pub async fn snapshots(&self) -> Vec<TransferJob> {
        let handles = self.handles().await;

        let mut jobs = Vec::with_capacity(handles.len());
        for handle in handles {
            jobs.push(handle.snapshot().await);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Number of jobs not yet in a terminal state
    pub async fn active_count(&self) -> usize {
        self.snapshots()
            .await
            .iter()
            .filter(|job| !job.is_terminal())
            .count()
    }
}
