//! Job queue abstraction.

use async_trait::async_trait;
use std::time::Duration;

use mflow_models::{FileId, Job, JobId, JobPayload, JobType};

use crate::error::QueueResult;

/// What `fail` did with a job.
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// Re-enqueued; available again after `delay`.
    Retrying { job: Job, delay: Duration },
    /// Attempts exhausted; the job is terminally failed.
    Exhausted(Job),
}

impl FailOutcome {
    pub fn job(&self) -> &Job {
        match self {
            FailOutcome::Retrying { job, .. } | FailOutcome::Exhausted(job) => job,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, FailOutcome::Exhausted(_))
    }
}

/// Durable per-type job queue.
///
/// Ordering is FIFO per type and types never share a budget. At most one
/// pending or active job exists per (file, type).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job, or return the id of the in-flight job for the same
    /// (file, type).
    async fn enqueue(&self, file_id: &FileId, job_type: JobType, payload: JobPayload) -> QueueResult<JobId>;

    /// Claim the next job of `job_type`, waiting up to `wait`.
    ///
    /// Jobs superseded by an equal-or-later completed job of the same
    /// (file, type) are completed silently and skipped.
    async fn dequeue(&self, job_type: JobType, wait: Duration) -> QueueResult<Option<Job>>;

    /// Complete an active job.
    async fn ack(&self, job_id: &JobId) -> QueueResult<Job>;

    /// Record a failed attempt and retry with backoff, or fail terminally
    /// once attempts are exhausted.
    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<FailOutcome>;

    /// Fail terminally without retrying.
    async fn fail_permanently(&self, job_id: &JobId, error: &str) -> QueueResult<Job>;

    /// Return an active job to pending without consuming an attempt.
    async fn release(&self, job_id: &JobId, delay: Duration) -> QueueResult<()>;

    /// Keep the claim on an active job alive while it runs. Fails with
    /// `LeaseLost` once another worker has taken the job over, and with
    /// `InvalidState` once the job was settled elsewhere.
    async fn heartbeat(&self, job_id: &JobId) -> QueueResult<()>;

    /// Fail every pending and active job of a file with `reason`. Returns
    /// the jobs that were active, whose processes the caller must stop.
    async fn cancel_file(&self, file_id: &FileId, reason: &str) -> QueueResult<Vec<Job>>;

    /// All jobs recorded for a file, oldest first.
    async fn jobs_for_file(&self, file_id: &FileId) -> QueueResult<Vec<Job>>;

    async fn get(&self, job_id: &JobId) -> QueueResult<Job>;

    /// Pending jobs of `job_type`.
    async fn depth(&self, job_type: JobType) -> QueueResult<u64>;
}
