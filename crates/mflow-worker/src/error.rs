//! Worker error types.

use thiserror::Error;

use mflow_media::MediaError;
use mflow_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] mflow_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }
}

/// Failure of one processor run. The variant decides what the worker does
/// with the job.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The source cannot be probed; retrying will not help.
    #[error("Probe failed: {0}")]
    Probe(String),

    /// External process crash, non-zero exit or timeout.
    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Storage failed: {0}")]
    Storage(String),

    /// Technical metadata is not written yet. The job goes back to pending
    /// without consuming an attempt.
    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    #[error("Job cancelled")]
    Cancelled,

    /// The source has nothing this processor can work on.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ProcessorError {
    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::Transcode(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Whether a failed attempt should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessorError::Transcode(_) | ProcessorError::Storage(_))
    }

    /// Whether the job is released rather than failed.
    pub fn is_release(&self) -> bool {
        matches!(self, ProcessorError::DependencyNotReady(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessorError::Cancelled)
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorError::Probe(_) => "probe",
            ProcessorError::Transcode(_) => "transcode",
            ProcessorError::Storage(_) => "storage",
            ProcessorError::DependencyNotReady(_) => "dependency_not_ready",
            ProcessorError::Cancelled => "cancelled",
            ProcessorError::Unsupported(_) => "unsupported",
        }
    }

    /// Map a probe failure. Only cancellation and timeouts are worth
    /// another attempt.
    pub fn from_probe(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => Self::Cancelled,
            MediaError::Timeout { .. }
            | MediaError::ResourceLimit(_)
            | MediaError::Io(_)
            | MediaError::FfprobeNotFound => Self::Transcode(err.diagnostic()),
            other => Self::Probe(other.diagnostic()),
        }
    }
}

impl From<MediaError> for ProcessorError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => Self::Cancelled,
            MediaError::InvalidMedia(msg) => Self::Unsupported(msg),
            other => Self::Transcode(other.diagnostic()),
        }
    }
}

impl From<StorageError> for ProcessorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileNotFound(id) => Self::Unsupported(format!("no file record for {}", id)),
            StorageError::InvalidKey(key) => Self::Unsupported(format!("invalid storage key {}", key)),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(format!("staging: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ProcessorError::transcode("exit 1").is_retryable());
        assert!(ProcessorError::Storage("503".into()).is_retryable());
        assert!(!ProcessorError::Probe("moov atom not found".into()).is_retryable());
        assert!(!ProcessorError::unsupported("no audio").is_retryable());
        assert!(!ProcessorError::Cancelled.is_retryable());
        assert!(ProcessorError::DependencyNotReady("metadata".into()).is_release());
    }

    #[test]
    fn test_media_error_mapping() {
        let err: ProcessorError = MediaError::ffmpeg_failed("exit 1", Some("Invalid data".into()), Some(1)).into();
        match err {
            ProcessorError::Transcode(msg) => assert!(msg.contains("Invalid data")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(ProcessorError::from(MediaError::Cancelled), ProcessorError::Cancelled));
    }

    #[test]
    fn test_probe_error_mapping() {
        let err = ProcessorError::from_probe(MediaError::invalid_media("no streams"));
        assert!(matches!(err, ProcessorError::Probe(_)));
        let err = ProcessorError::from_probe(MediaError::Timeout { secs: 30, stderr: None });
        assert!(err.is_retryable());
    }
}
