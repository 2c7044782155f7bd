//! Per-file pipeline orchestration.
//!
//! The orchestrator is the only writer of a file's aggregate status. It
//! decides which jobs a file gets (metadata first, then the dependents its
//! media category calls for) and when the file is ready.
//!
//! ```text
//! uploading -> processing -> ready
//!                  |
//!                  +-------> processing_failed
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use mflow_models::{
    FileId, FileStatus, Job, JobId, JobPayload, JobStatus, JobType, MimeCategory, SourceFile,
    TechnicalMetadata,
};
use mflow_queue::JobQueue;
use mflow_storage::FileRecordStore;

use crate::cancel::CancelRegistry;
use crate::error::WorkerResult;
use crate::metrics;

/// Reason recorded on jobs stopped by `cancel_file`.
pub const CANCELLED_REASON: &str = "cancelled";

/// Reason recorded on jobs of a previous upload of the same file.
pub const SUPERSEDED_REASON: &str = "superseded by a new upload";

pub struct Orchestrator {
    queue: Arc<dyn JobQueue>,
    records: Arc<dyn FileRecordStore>,
    cancels: Arc<CancelRegistry>,
}

impl Orchestrator {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        records: Arc<dyn FileRecordStore>,
        cancels: Arc<CancelRegistry>,
    ) -> Self {
        Self {
            queue,
            records,
            cancels,
        }
    }

    /// Start processing an uploaded (or re-uploaded) file.
    ///
    /// Returns the metadata job id, or `None` when the file has nothing to
    /// derive and went straight to `ready`.
    pub async fn on_upload_complete(&self, file: &SourceFile) -> WorkerResult<Option<JobId>> {
        let stopped = self.stop_jobs(&file.file_id, SUPERSEDED_REASON).await?;
        if stopped > 0 {
            info!(file_id = %file.file_id, stopped, "Stopped jobs of previous upload");
        }

        self.records.register_file(file).await?;

        let category = file.category();
        if category == MimeCategory::Other {
            self.transition(&file.file_id, FileStatus::Ready, None).await?;
            return Ok(None);
        }

        self.transition(&file.file_id, FileStatus::Processing, None).await?;
        let job_id = self.enqueue(file, JobType::Metadata).await?;
        info!(
            file_id = %file.file_id,
            category = category.as_str(),
            job_id = %job_id,
            "Upload accepted"
        );
        Ok(Some(job_id))
    }

    /// React to an acked job: fan out after metadata, then re-evaluate
    /// readiness.
    pub async fn on_job_succeeded(&self, job: &Job) -> WorkerResult<FileStatus> {
        if job.job_type == JobType::Metadata {
            let file = self.records.get_file(&job.file_id).await?;
            let metadata = self.records.get_metadata(&job.file_id).await?;
            let category = effective_category(&file, metadata.as_ref());

            for job_type in dependents(category, metadata.as_ref()) {
                self.enqueue(&file, job_type).await?;
            }
        }

        self.evaluate_readiness(&job.file_id).await
    }

    /// React to a terminally failed job.
    pub async fn on_job_failed(&self, job: &Job) -> WorkerResult<FileStatus> {
        warn!(
            job_id = %job.id,
            file_id = %job.file_id,
            job_type = %job.job_type,
            error = job.last_error.as_deref().unwrap_or("unknown"),
            "Job failed terminally"
        );
        self.evaluate_readiness(&job.file_id).await
    }

    /// Stop all work on a file, e.g. because it is being deleted.
    ///
    /// Pending and active jobs are failed with reason `cancelled` and any
    /// running external process of this worker is killed. Returns the number
    /// of jobs that were active.
    pub async fn cancel_file(&self, file_id: &FileId) -> WorkerResult<usize> {
        let stopped = self.stop_jobs(file_id, CANCELLED_REASON).await?;
        info!(file_id = %file_id, stopped, "File cancelled");
        Ok(stopped)
    }

    /// Recompute a file's status from its latest job per type.
    ///
    /// Terminal statuses stick until the file is registered again.
    pub async fn evaluate_readiness(&self, file_id: &FileId) -> WorkerResult<FileStatus> {
        let record = self.records.get_record(file_id).await?;
        if record.status.is_terminal() {
            return Ok(record.status);
        }

        let jobs = self.queue.jobs_for_file(file_id).await?;
        let category = effective_category(&record.file, record.metadata.as_ref());

        match evaluate(category, &latest_per_type(jobs)) {
            Readiness::Pending => Ok(record.status),
            Readiness::Ready => {
                self.transition(file_id, FileStatus::Ready, None).await?;
                Ok(FileStatus::Ready)
            }
            Readiness::Failed(error) => {
                self.transition(file_id, FileStatus::ProcessingFailed, Some(&error))
                    .await?;
                Ok(FileStatus::ProcessingFailed)
            }
        }
    }

    async fn enqueue(&self, file: &SourceFile, job_type: JobType) -> WorkerResult<JobId> {
        let payload = JobPayload::new(file.storage_key.clone(), file.mime_type.clone());
        let job_id = self.queue.enqueue(&file.file_id, job_type, payload).await?;
        metrics::record_job_enqueued(job_type);
        Ok(job_id)
    }

    async fn stop_jobs(&self, file_id: &FileId, reason: &str) -> WorkerResult<usize> {
        let active = self.queue.cancel_file(file_id, reason).await?;
        for job in &active {
            self.cancels.cancel(&job.id);
        }
        Ok(active.len())
    }

    async fn transition(
        &self,
        file_id: &FileId,
        status: FileStatus,
        error: Option<&str>,
    ) -> WorkerResult<()> {
        self.records.set_status(file_id, status, error).await?;
        metrics::record_file_status(status);
        match error {
            Some(error) => warn!(file_id = %file_id, status = %status, error, "File status changed"),
            None => info!(file_id = %file_id, status = %status, "File status changed"),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// Media category after probing. A video container without a video stream
/// is processed as audio.
fn effective_category(file: &SourceFile, metadata: Option<&TechnicalMetadata>) -> MimeCategory {
    match (file.category(), metadata) {
        (MimeCategory::Video, Some(m)) if !m.has_video => MimeCategory::Audio,
        (category, _) => category,
    }
}

/// Jobs enqueued once metadata is known.
fn dependents(category: MimeCategory, metadata: Option<&TechnicalMetadata>) -> Vec<JobType> {
    let has_audio = metadata.map(|m| m.has_audio).unwrap_or(false);
    match category {
        MimeCategory::Video => {
            let mut jobs = vec![JobType::Thumbnail, JobType::Proxy, JobType::Filmstrip];
            if has_audio {
                jobs.push(JobType::Waveform);
            }
            jobs
        }
        MimeCategory::Audio => vec![JobType::Waveform],
        MimeCategory::Image => vec![JobType::Thumbnail],
        MimeCategory::Other => Vec::new(),
    }
}

/// Jobs that must complete before the file is ready. Everything else is a
/// progressive enhancement.
fn required(category: MimeCategory) -> &'static [JobType] {
    match category {
        MimeCategory::Video | MimeCategory::Image => &[JobType::Metadata, JobType::Thumbnail],
        MimeCategory::Audio => &[JobType::Metadata],
        MimeCategory::Other => &[],
    }
}

fn latest_per_type(jobs: Vec<Job>) -> HashMap<JobType, Job> {
    let mut latest: HashMap<JobType, Job> = HashMap::new();
    for job in jobs {
        match latest.get(&job.job_type) {
            Some(seen) if seen.enqueued_at > job.enqueued_at => {}
            _ => {
                latest.insert(job.job_type, job);
            }
        }
    }
    latest
}

fn evaluate(category: MimeCategory, latest: &HashMap<JobType, Job>) -> Readiness {
    let mut ready = true;
    for job_type in required(category) {
        match latest.get(job_type) {
            Some(job) if job.status == JobStatus::Completed => {}
            Some(job) if job.status == JobStatus::Failed => {
                return Readiness::Failed(format!(
                    "{}: {}",
                    job_type,
                    job.last_error.as_deref().unwrap_or("failed")
                ));
            }
            _ => ready = false,
        }
    }
    if ready {
        Readiness::Ready
    } else {
        Readiness::Pending
    }
}
