//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::file::FileId;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of derived-asset work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Metadata,
    Thumbnail,
    Proxy,
    Waveform,
    Filmstrip,
}

impl JobType {
    /// All job types, in pipeline order.
    pub const ALL: [JobType; 5] = [
        JobType::Metadata,
        JobType::Thumbnail,
        JobType::Proxy,
        JobType::Waveform,
        JobType::Filmstrip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Metadata => "metadata",
            JobType::Thumbnail => "thumbnail",
            JobType::Proxy => "proxy",
            JobType::Waveform => "waveform",
            JobType::Filmstrip => "filmstrip",
        }
    }

    /// Whether the job reads technical metadata written by the metadata job.
    pub fn requires_metadata(&self) -> bool {
        matches!(
            self,
            JobType::Proxy | JobType::Waveform | JobType::Filmstrip
        )
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata" => Ok(JobType::Metadata),
            "thumbnail" => Ok(JobType::Thumbnail),
            "proxy" => Ok(JobType::Proxy),
            "waveform" => Ok(JobType::Waveform),
            "filmstrip" => Ok(JobType::Filmstrip),
            other => Err(format!("unknown job type: {}", other)),
        }
    }
}

/// Job state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in queue (including a scheduled retry)
    #[default]
    Pending,
    /// Claimed by a worker
    Active,
    /// Completed successfully
    Completed,
    /// Terminally failed; no further automatic retry
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Active)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload handed to the enqueue entry point by the upload-completion handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobPayload {
    /// Object storage key of the uploaded source
    pub storage_key: String,
    /// MIME type reported at upload
    pub mime_type: String,
}

impl JobPayload {
    pub fn new(storage_key: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// A durable job record owned by the queue.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// File this job derives assets for
    pub file_id: FileId,

    /// Job type
    pub job_type: JobType,

    /// Source location and MIME type
    pub payload: JobPayload,

    /// Current state
    #[serde(default)]
    pub status: JobStatus,

    /// Failed attempts so far
    #[serde(default)]
    pub attempts: u32,

    /// Attempts allowed before terminal failure
    pub max_attempts: u32,

    /// Diagnostic from the most recent failure (stderr tail or error text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the job was first enqueued
    pub enqueued_at: DateTime<Utc>,

    /// Earliest time the job may be dequeued (set by retry backoff)
    pub available_at: DateTime<Utc>,

    /// When the current attempt started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(file_id: FileId, job_type: JobType, payload: JobPayload, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            file_id,
            job_type,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            enqueued_at: now,
            available_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Dedup key: at most one in-flight job per (file, type).
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.file_id, self.job_type)
    }

    /// Mark the job as claimed by a worker.
    pub fn start(&mut self) {
        self.status = JobStatus::Active;
        self.started_at = Some(Utc::now());
    }

    /// Mark the job as completed.
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Record a failed attempt. Returns `true` if another attempt is allowed.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        self.attempts = (self.attempts + 1).min(self.max_attempts);
        self.last_error = Some(error.into());
        self.attempts < self.max_attempts
    }

    /// Mark the job as terminally failed.
    pub fn fail_terminal(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Return the job to pending, available at `available_at`.
    pub fn reschedule(&mut self, available_at: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.available_at = available_at;
    }
}

/// Dedup key for a (file, type) pair.
pub fn dedup_key(file_id: &FileId, job_type: JobType) -> String {
    format!("{}:{}", file_id, job_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(max_attempts: u32) -> Job {
        Job::new(
            FileId::from("file-1"),
            JobType::Proxy,
            JobPayload::new("uploads/file-1.mov", "video/quicktime"),
            max_attempts,
        )
    }

    #[test]
    fn test_job_creation() {
        let job = job(3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.dedup_key(), "file-1:proxy");
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = job(3);
        job.start();
        assert_eq!(job.status, JobStatus::Active);
        assert!(job.started_at.is_some());

        job.complete();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_attempts_never_exceed_max() {
        let mut job = job(2);
        assert!(job.record_failure("boom"));
        assert!(!job.record_failure("boom"));
        assert!(!job.record_failure("boom"));
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_job_type_parse() {
        for t in JobType::ALL {
            assert_eq!(t.as_str().parse::<JobType>().unwrap(), t);
        }
        assert!("transcode".parse::<JobType>().is_err());
    }

    #[test]
    fn test_job_type_serde() {
        let json = serde_json::to_string(&JobType::Filmstrip).unwrap();
        assert_eq!(json, "\"filmstrip\"");
    }
}
