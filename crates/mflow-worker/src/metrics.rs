//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use mflow_models::{FileStatus, JobType};

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Queue metrics
    pub const QUEUE_DEPTH: &str = "mflow_queue_depth";
    pub const JOBS_ENQUEUED_TOTAL: &str = "mflow_jobs_enqueued_total";

    // Job lifecycle metrics
    pub const JOBS_STARTED_TOTAL: &str = "mflow_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "mflow_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "mflow_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "mflow_jobs_retried_total";
    pub const JOBS_RELEASED_TOTAL: &str = "mflow_jobs_released_total";
    pub const JOB_DURATION_SECONDS: &str = "mflow_job_duration_seconds";
    pub const JOBS_ACTIVE: &str = "mflow_jobs_active";

    // Output metrics
    pub const ASSETS_WRITTEN_TOTAL: &str = "mflow_assets_written_total";
    pub const FILE_STATUS_TOTAL: &str = "mflow_file_status_transitions_total";
}

pub fn set_queue_depth(job_type: JobType, depth: u64) {
    let labels = [("type", job_type.as_str().to_string())];
    gauge!(names::QUEUE_DEPTH, &labels).set(depth as f64);
}

pub fn record_job_enqueued(job_type: JobType) {
    let labels = [("type", job_type.as_str().to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_job_started(job_type: JobType) {
    let labels = [("type", job_type.as_str().to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
    gauge!(names::JOBS_ACTIVE, &labels).increment(1.0);
}

/// Record the end of an attempt, whatever its outcome.
pub fn record_job_finished(job_type: JobType, duration_secs: f64) {
    let labels = [("type", job_type.as_str().to_string())];
    gauge!(names::JOBS_ACTIVE, &labels).decrement(1.0);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_completed(job_type: JobType) {
    let labels = [("type", job_type.as_str().to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

/// Record a terminal failure.
pub fn record_job_failed(job_type: JobType, reason: &str) {
    let labels = [
        ("type", job_type.as_str().to_string()),
        ("reason", reason.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_retried(job_type: JobType) {
    let labels = [("type", job_type.as_str().to_string())];
    counter!(names::JOBS_RETRIED_TOTAL, &labels).increment(1);
}

pub fn record_job_released(job_type: JobType) {
    let labels = [("type", job_type.as_str().to_string())];
    counter!(names::JOBS_RELEASED_TOTAL, &labels).increment(1);
}

pub fn record_asset_written(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::ASSETS_WRITTEN_TOTAL, &labels).increment(1);
}

pub fn record_file_status(status: FileStatus) {
    let labels = [("status", status.as_str().to_string())];
    counter!(names::FILE_STATUS_TOTAL, &labels).increment(1);
}
