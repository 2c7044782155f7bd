//! Job executor.
//!
//! One dequeue loop per job type, each bounded by its own semaphore so a
//! backlog of proxies never starves thumbnails. Every claimed job runs in
//! its own task: stage the source, run the processor, persist the result,
//! then settle the job with the queue and tell the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use mflow_media::{FfmpegRunner, ProcessLimiter};
use mflow_models::{DerivedAsset, Job, JobType};
use mflow_queue::{FailOutcome, JobQueue, QueueError};
use mflow_storage::{download_to_file, FileRecordStore, ObjectStore, StorageError};

use crate::cancel::{CancelGuard, CancelRegistry};
use crate::config::WorkerConfig;
use crate::error::{ProcessorError, ProcessorResult, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::orchestrator::Orchestrator;
use crate::processors::{
    Artifact, ArtifactBody, Processor, ProcessorInput, ProcessorOutput, ProcessorRegistry,
};
use crate::retry::{retry_async, FailureTracker, RetryConfig};
use crate::staging::JobStaging;

/// Everything a job task needs, shared by all loops.
struct WorkerContext {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    records: Arc<dyn FileRecordStore>,
    store: Arc<dyn ObjectStore>,
    processors: ProcessorRegistry,
    orchestrator: Arc<Orchestrator>,
    cancels: Arc<CancelRegistry>,
    limiter: ProcessLimiter,
    shutdown: watch::Sender<bool>,
}

impl WorkerContext {
    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    ctx: Arc<WorkerContext>,
    semaphores: HashMap<JobType, Arc<Semaphore>>,
}

impl JobExecutor {
    /// Create an executor running the standard processors.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        records: Arc<dyn FileRecordStore>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let processors = ProcessorRegistry::standard(&config);
        Self::with_processors(config, queue, records, store, processors)
    }

    pub fn with_processors(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        records: Arc<dyn FileRecordStore>,
        store: Arc<dyn ObjectStore>,
        processors: ProcessorRegistry,
    ) -> Self {
        let cancels = Arc::new(CancelRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&queue),
            Arc::clone(&records),
            Arc::clone(&cancels),
        ));
        let limiter = ProcessLimiter::new(config.max_ffmpeg_processes);
        let semaphores = processors
            .job_types()
            .into_iter()
            .map(|t| (t, Arc::new(Semaphore::new(config.concurrency_for(t)))))
            .collect();
        let (shutdown, _) = watch::channel(false);

        Self {
            ctx: Arc::new(WorkerContext {
                config,
                queue,
                records,
                store,
                processors,
                orchestrator,
                cancels,
                limiter,
                shutdown,
            }),
            semaphores,
        }
    }

    /// Orchestrator sharing this executor's queue, records and cancel
    /// registry. Upload completions and deletions go through it.
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.ctx.orchestrator)
    }

    /// Run until `shutdown` is called, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        tokio::fs::create_dir_all(&self.ctx.config.work_dir).await?;
        info!(
            types = ?self.ctx.processors.job_types(),
            max_ffmpeg = self.ctx.config.max_ffmpeg_processes,
            work_dir = %self.ctx.config.work_dir.display(),
            "Starting job executor"
        );

        let mut loops = Vec::with_capacity(self.semaphores.len());
        for (job_type, semaphore) in &self.semaphores {
            loops.push(tokio::spawn(Self::type_loop(
                Arc::clone(&self.ctx),
                *job_type,
                Arc::clone(semaphore),
            )));
        }
        let reporter = tokio::spawn(Self::report_depth(Arc::clone(&self.ctx)));

        for handle in loops {
            if let Err(e) = handle.await {
                error!("Worker loop panicked: {}", e);
            }
        }
        reporter.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            let killed = self.ctx.cancels.cancel_all();
            warn!(killed, "Shutdown timeout reached, terminating running jobs");
            // Killed jobs release themselves back to pending
            if tokio::time::timeout(Duration::from_secs(10), self.wait_for_jobs())
                .await
                .is_err()
            {
                warn!(
                    still_running = self.ctx.cancels.active(),
                    "Jobs still running after termination; the queue will redeliver them"
                );
            }
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.ctx.shutdown.send_replace(true);
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let busy = self
                .semaphores
                .iter()
                .any(|(t, s)| s.available_permits() < self.ctx.config.concurrency_for(*t));
            if !busy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn type_loop(ctx: Arc<WorkerContext>, job_type: JobType, semaphore: Arc<Semaphore>) {
        let Some(processor) = ctx.processors.get(job_type) else {
            return;
        };
        let mut shutdown_rx = ctx.shutdown.subscribe();
        let mut failures = FailureTracker::new(3);

        info!(
            job_type = %job_type,
            concurrency = ctx.config.concurrency_for(job_type),
            "Worker loop started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match ctx.queue.dequeue(job_type, ctx.config.poll_wait).await {
                Ok(Some(job)) => {
                    failures.record_success();
                    if ctx.is_shutting_down() {
                        Self::release(&ctx, &job, Duration::ZERO).await;
                        break;
                    }

                    let ctx = Arc::clone(&ctx);
                    let processor = Arc::clone(&processor);
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::execute_job(&ctx, processor.as_ref(), job).await;
                    });
                }
                Ok(None) => failures.record_success(),
                Err(e) => {
                    drop(permit);
                    if failures.record_failure() {
                        error!(job_type = %job_type, "Failed to dequeue: {}", e);
                    }
                    let backoff = Duration::from_secs(u64::from(failures.failure_count().min(5)));
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(job_type = %job_type, "Worker loop stopped");
    }

    /// Refresh the queue depth gauges until shutdown.
    async fn report_depth(ctx: Arc<WorkerContext>) {
        let period = ctx.config.depth_report_interval.max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        let mut shutdown_rx = ctx.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    for job_type in JobType::ALL {
                        match ctx.queue.depth(job_type).await {
                            Ok(depth) => metrics::set_queue_depth(job_type, depth),
                            Err(e) => debug!(job_type = %job_type, "Depth query failed: {}", e),
                        }
                    }
                }
            }
        }
    }

    /// Execute one claimed job and settle it with the queue.
    async fn execute_job(ctx: &WorkerContext, processor: &dyn Processor, job: Job) {
        let logger = JobLogger::new(&job);
        logger.log_start(job.attempts + 1, job.max_attempts);
        metrics::record_job_started(job.job_type);

        let started = Instant::now();
        let guard = ctx.cancels.register(&job.id);
        let heartbeat = tokio::spawn(Self::keep_alive(
            Arc::clone(&ctx.queue),
            Arc::clone(&ctx.cancels),
            job.clone(),
            ctx.config.heartbeat_interval,
        ));

        let result = Self::run_attempt(ctx, processor, &job, &guard)
            .instrument(logger.create_span())
            .await;
        heartbeat.abort();

        metrics::record_job_finished(job.job_type, started.elapsed().as_secs_f64());
        Self::settle(ctx, &job, result, &logger, started.elapsed().as_secs_f64()).await;
    }

    /// Renew the job's claim until aborted. A job taken over by another
    /// worker, or settled elsewhere, is cancelled here.
    async fn keep_alive(queue: Arc<dyn JobQueue>, cancels: Arc<CancelRegistry>, job: Job, period: Duration) {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(10)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            match queue.heartbeat(&job.id).await {
                Ok(()) => {}
                Err(e @ (QueueError::LeaseLost(_) | QueueError::InvalidState { .. } | QueueError::JobNotFound(_))) => {
                    warn!(job_id = %job.id, file_id = %job.file_id, "Stopping job: {}", e);
                    cancels.cancel(&job.id);
                    break;
                }
                Err(e) => warn!(job_id = %job.id, "Heartbeat failed: {}", e),
            }
        }
    }

    async fn run_attempt(
        ctx: &WorkerContext,
        processor: &dyn Processor,
        job: &Job,
        guard: &CancelGuard,
    ) -> ProcessorResult<()> {
        let file = ctx.records.get_file(&job.file_id).await?;

        let metadata = if job.job_type == JobType::Metadata {
            None
        } else {
            ctx.records.get_metadata(&job.file_id).await?
        };
        if job.job_type.requires_metadata() && metadata.is_none() {
            return Err(ProcessorError::DependencyNotReady(format!(
                "no technical metadata for {}",
                job.file_id
            )));
        }

        // Dropped at the end of the attempt, whatever the outcome
        let staging = JobStaging::create(&ctx.config.work_dir, job).await?;
        let source_path = staging.source_path(&file);

        let download = RetryConfig::new("download source");
        let bytes = retry_async(&download, is_transient, || {
            download_to_file(ctx.store.as_ref(), &file.storage_key, &source_path)
        })
        .await
        .into_result()?;
        debug!(bytes, key = %file.storage_key, "Source staged");

        let runner = FfmpegRunner::new()
            .with_cancel(guard.receiver())
            .with_limiter(ctx.limiter.clone())
            .with_operation(format!("{} {}", job.job_type, job.file_id));

        let input = ProcessorInput {
            job: job.clone(),
            file,
            metadata,
            source_path,
            work_dir: staging.path().to_path_buf(),
            runner,
        };
        let output = processor.process(&input).await?;

        // A job cancelled while its process was finishing must not write
        if guard.is_cancelled() || Self::settled_elsewhere(ctx, job).await {
            return Err(ProcessorError::Cancelled);
        }

        Self::persist(ctx, job, output).await
    }

    /// Whether this worker no longer owns the attempt, e.g. because
    /// another worker cancelled the file or reclaimed the job.
    async fn settled_elsewhere(ctx: &WorkerContext, job: &Job) -> bool {
        matches!(
            ctx.queue.heartbeat(&job.id).await,
            Err(QueueError::LeaseLost(_) | QueueError::InvalidState { .. } | QueueError::JobNotFound(_))
        )
    }

    /// Write the processor output. Storage keys are fixed per (file, kind),
    /// so a redelivered job overwrites its earlier objects and rows.
    async fn persist(ctx: &WorkerContext, job: &Job, output: ProcessorOutput) -> ProcessorResult<()> {
        let write = RetryConfig::new("persist output");

        match output {
            ProcessorOutput::Metadata(metadata) => {
                retry_async(&write, is_transient, || {
                    ctx.records.update_technical_metadata(&job.file_id, &metadata)
                })
                .await
                .into_result()?;
            }
            ProcessorOutput::Artifacts(artifacts) => {
                for artifact in &artifacts {
                    Self::persist_artifact(ctx, job, artifact, &write).await?;
                }
            }
        }
        Ok(())
    }

    async fn persist_artifact(
        ctx: &WorkerContext,
        job: &Job,
        artifact: &Artifact,
        write: &RetryConfig,
    ) -> ProcessorResult<()> {
        let key = artifact.kind.storage_key(&job.file_id);
        let content_type = artifact.kind.content_type();

        let key_ref = key.as_str();
        retry_async(write, is_transient, || async move {
            match &artifact.body {
                ArtifactBody::Bytes(data) => ctx.store.put_object(key_ref, data.clone(), content_type).await,
                ArtifactBody::File(path) => ctx.store.put_file(key_ref, path, content_type).await,
            }
        })
        .await
        .into_result()?;

        let asset = DerivedAsset::new(job.file_id.clone(), artifact.kind, key.clone());
        retry_async(write, is_transient, || ctx.records.add_derived_asset(&asset))
            .await
            .into_result()?;

        metrics::record_asset_written(artifact.kind.as_str());
        debug!(kind = %artifact.kind, key = %key, "Asset written");
        Ok(())
    }

    async fn settle(
        ctx: &WorkerContext,
        job: &Job,
        result: ProcessorResult<()>,
        logger: &JobLogger,
        elapsed_secs: f64,
    ) {
        let error = match result {
            Ok(()) => {
                match ctx.queue.ack(&job.id).await {
                    Ok(acked) => {
                        logger.log_completion(elapsed_secs);
                        metrics::record_job_completed(job.job_type);
                        if let Err(e) = ctx.orchestrator.on_job_succeeded(&acked).await {
                            logger.log_error(&format!("orchestrator update failed: {}", e));
                        }
                    }
                    Err(QueueError::InvalidState { status, .. }) => {
                        logger.log_warning(&format!("job is {} before ack; result discarded", status));
                    }
                    Err(e) => logger.log_error(&format!("ack failed: {}", e)),
                }
                return;
            }
            Err(error) => error,
        };

        if error.is_cancelled() {
            if ctx.is_shutting_down() {
                Self::release(ctx, job, Duration::ZERO).await;
            } else {
                logger.log_warning("cancelled; output discarded");
            }
            return;
        }

        if error.is_release() {
            logger.log_warning(&error.to_string());
            Self::release(ctx, job, ctx.config.dependency_retry_delay).await;
            return;
        }

        let message = error.to_string();
        if error.is_retryable() {
            match ctx.queue.fail(&job.id, &message).await {
                Ok(FailOutcome::Retrying { job: retried, delay }) => {
                    logger.log_warning(&format!(
                        "attempt {}/{} failed, retrying in {:?}: {}",
                        retried.attempts, retried.max_attempts, delay, message
                    ));
                    metrics::record_job_retried(job.job_type);
                }
                Ok(FailOutcome::Exhausted(failed)) => {
                    logger.log_error(&format!("attempts exhausted: {}", message));
                    metrics::record_job_failed(job.job_type, error.kind());
                    Self::notify_failed(ctx, &failed, logger).await;
                }
                Err(e) => logger.log_error(&format!("failed to record failure: {}", e)),
            }
        } else {
            match ctx.queue.fail_permanently(&job.id, &message).await {
                Ok(failed) => {
                    logger.log_error(&message);
                    metrics::record_job_failed(job.job_type, error.kind());
                    Self::notify_failed(ctx, &failed, logger).await;
                }
                Err(e) => logger.log_error(&format!("failed to record failure: {}", e)),
            }
        }
    }

    async fn notify_failed(ctx: &WorkerContext, failed: &Job, logger: &JobLogger) {
        if let Err(e) = ctx.orchestrator.on_job_failed(failed).await {
            logger.log_error(&format!("orchestrator update failed: {}", e));
        }
    }

    async fn release(ctx: &WorkerContext, job: &Job, delay: Duration) {
        match ctx.queue.release(&job.id, delay).await {
            Ok(()) => {
                metrics::record_job_released(job.job_type);
                debug!(job_id = %job.id, ?delay, "Job released");
            }
            Err(e) => warn!(job_id = %job.id, "Failed to release job: {}", e),
        }
    }
}

/// Storage errors worth retrying inside one attempt.
fn is_transient(err: &StorageError) -> bool {
    !matches!(
        err,
        StorageError::NotFound(_)
            | StorageError::FileNotFound(_)
            | StorageError::InvalidKey(_)
            | StorageError::ConfigError(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_objects_are_not_retried_in_place() {
        assert!(!is_transient(&StorageError::NotFound("uploads/x".into())));
        assert!(!is_transient(&StorageError::InvalidKey("../x".into())));
        assert!(is_transient(&StorageError::UploadFailed("503".into())));
    }
}
