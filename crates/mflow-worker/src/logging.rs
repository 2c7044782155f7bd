//! Structured job logging utilities.
//!
//! Every line carries the job id, file id and job type so a file's pipeline
//! can be followed across workers.

use tracing::{error, info, warn, Span};

use mflow_models::{FileId, Job, JobId, JobType};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    file_id: FileId,
    job_type: JobType,
}

impl JobLogger {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            file_id: job.file_id.clone(),
            job_type: job.job_type,
        }
    }

    /// Log the start of an attempt.
    pub fn log_start(&self, attempt: u32, max_attempts: u32) {
        info!(
            job_id = %self.job_id,
            file_id = %self.file_id,
            job_type = %self.job_type,
            "Job started (attempt {}/{})", attempt, max_attempts
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            file_id = %self.file_id,
            job_type = %self.job_type,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            file_id = %self.file_id,
            job_type = %self.job_type,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            file_id = %self.file_id,
            job_type = %self.job_type,
            "Job error: {}", message
        );
    }

    /// Log a successful attempt with its wall time.
    pub fn log_completion(&self, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            file_id = %self.file_id,
            job_type = %self.job_type,
            elapsed_secs,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Span wrapping the whole attempt, so media-layer logs inherit the
    /// job fields.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            file_id = %self.file_id,
            job_type = %self.job_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflow_models::JobPayload;

    #[test]
    fn test_job_logger_creation() {
        let job = Job::new(
            FileId::from("f1"),
            JobType::Waveform,
            JobPayload::new("uploads/f1.wav", "audio/wav"),
            3,
        );
        let logger = JobLogger::new(&job);

        assert_eq!(logger.job_id(), &job.id);
        assert_eq!(logger.job_type(), JobType::Waveform);
    }
}
