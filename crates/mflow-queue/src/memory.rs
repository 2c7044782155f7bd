//! In-process queue backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use mflow_models::{FileId, Job, JobId, JobPayload, JobStatus, JobType};

use crate::backoff::retry_delay;
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{FailOutcome, JobQueue};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    pending: HashMap<JobType, VecDeque<JobId>>,
    /// Dedup key -> pending or active job
    in_flight: HashMap<String, JobId>,
    active: HashMap<JobType, usize>,
    /// Dedup key -> enqueue time of the latest completed job
    completed: HashMap<String, DateTime<Utc>>,
    by_file: HashMap<FileId, Vec<JobId>>,
}

impl State {
    fn job_mut(&mut self, job_id: &JobId) -> QueueResult<&mut Job> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::job_not_found(job_id))
    }

    fn release_slot(&mut self, job_type: JobType) {
        if let Some(active) = self.active.get_mut(&job_type) {
            *active = active.saturating_sub(1);
        }
    }

    fn clear_in_flight(&mut self, job: &Job) {
        let key = job.dedup_key();
        if self.in_flight.get(&key) == Some(&job.id) {
            self.in_flight.remove(&key);
        }
    }

    fn expect_active(&mut self, job_id: &JobId) -> QueueResult<&mut Job> {
        let job = self.job_mut(job_id)?;
        if job.status != JobStatus::Active {
            return Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                status: job.status.as_str().to_string(),
                expected: JobStatus::Active.as_str().to_string(),
            });
        }
        Ok(job)
    }
}

enum Claim {
    Job(Job),
    /// Nothing claimable; the earliest delayed job becomes available then
    Wait(Option<DateTime<Utc>>),
}

/// Single-process queue used by tests and local runs.
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    notify: HashMap<JobType, Notify>,
    config: QueueConfig,
}

impl InMemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: JobType::ALL.iter().map(|t| (*t, Notify::new())).collect(),
            config,
        }
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| QueueError::Poisoned)
    }

    fn wake(&self, job_type: JobType) {
        if let Some(notify) = self.notify.get(&job_type) {
            notify.notify_one();
        }
    }

    fn try_claim(&self, job_type: JobType) -> QueueResult<Claim> {
        let budget = self.config.type_config(job_type).concurrency;
        let mut state = self.lock()?;
        let now = Utc::now();

        loop {
            if state.active.get(&job_type).copied().unwrap_or(0) >= budget {
                return Ok(Claim::Wait(None));
            }

            let mut earliest: Option<DateTime<Utc>> = None;
            let mut ready: Option<usize> = None;
            if let Some(queue) = state.pending.get(&job_type) {
                for (i, id) in queue.iter().enumerate() {
                    match state.jobs.get(id) {
                        Some(job) if job.status == JobStatus::Pending && job.available_at > now => {
                            earliest = Some(earliest.map_or(job.available_at, |e| e.min(job.available_at)));
                        }
                        // Ready, or stale and dropped below
                        _ => {
                            ready = Some(i);
                            break;
                        }
                    }
                }
            }

            let Some(index) = ready else {
                return Ok(Claim::Wait(earliest));
            };

            let Some(job_id) = state.pending.entry(job_type).or_default().remove(index) else {
                return Ok(Claim::Wait(earliest));
            };
            let Some(job) = state.jobs.get(&job_id).cloned() else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }

            let key = job.dedup_key();
            let superseded = state
                .completed
                .get(&key)
                .is_some_and(|done| *done >= job.enqueued_at);
            if superseded {
                debug!(job_id = %job.id, key = %key, "Skipping job superseded by a completed run");
                if let Some(stale) = state.jobs.get_mut(&job_id) {
                    stale.complete();
                }
                state.clear_in_flight(&job);
                continue;
            }

            *state.active.entry(job_type).or_insert(0) += 1;
            let claimed = state.job_mut(&job_id)?;
            claimed.start();
            return Ok(Claim::Job(claimed.clone()));
        }
    }

    #[cfg(test)]
    fn insert_pending(&self, job: Job) {
        let mut state = self.state.lock().unwrap();
        state.pending.entry(job.job_type).or_default().push_back(job.id.clone());
        state.jobs.insert(job.id.clone(), job);
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, file_id: &FileId, job_type: JobType, payload: JobPayload) -> QueueResult<JobId> {
        let max_attempts = self.config.type_config(job_type).max_attempts;
        let job_id = {
            let mut state = self.lock()?;
            let key = mflow_models::dedup_key(file_id, job_type);

            if let Some(existing) = state.in_flight.get(&key) {
                debug!(job_id = %existing, key = %key, "Duplicate enqueue ignored");
                return Ok(existing.clone());
            }

            let job = Job::new(file_id.clone(), job_type, payload, max_attempts);
            let job_id = job.id.clone();
            state.in_flight.insert(key, job_id.clone());
            state.pending.entry(job_type).or_default().push_back(job_id.clone());
            state.by_file.entry(file_id.clone()).or_default().push(job_id.clone());
            state.jobs.insert(job_id.clone(), job);
            job_id
        };

        info!(job_id = %job_id, file_id = %file_id, job_type = %job_type, "Enqueued job");
        self.wake(job_type);
        Ok(job_id)
    }

    async fn dequeue(&self, job_type: JobType, wait: Duration) -> QueueResult<Option<Job>> {
        let deadline = tokio::time::Instant::now() + wait;
        let notify = self
            .notify
            .get(&job_type)
            .ok_or_else(|| QueueError::DequeueFailed(format!("no notifier for {}", job_type)))?;

        loop {
            let next_at = match self.try_claim(job_type)? {
                Claim::Job(job) => return Ok(Some(job)),
                Claim::Wait(next_at) => next_at,
            };

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let mut sleep_for = deadline - now;
            if let Some(at) = next_at {
                let until = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                sleep_for = sleep_for.min(until.max(Duration::from_millis(1)));
            }

            let _ = tokio::time::timeout(sleep_for, notify.notified()).await;
        }
    }

    async fn ack(&self, job_id: &JobId) -> QueueResult<Job> {
        let job = {
            let mut state = self.lock()?;
            if let Some(job) = state.jobs.get(job_id) {
                if job.status == JobStatus::Completed {
                    return Ok(job.clone());
                }
            }

            let job = state.expect_active(job_id)?;
            job.complete();
            let job = job.clone();

            state.release_slot(job.job_type);
            state.clear_in_flight(&job);
            let marker = state.completed.entry(job.dedup_key()).or_insert(job.enqueued_at);
            if *marker < job.enqueued_at {
                *marker = job.enqueued_at;
            }
            job
        };

        debug!(job_id = %job.id, job_type = %job.job_type, "Acknowledged job");
        self.wake(job.job_type);
        Ok(job)
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<FailOutcome> {
        let outcome = {
            let mut state = self.lock()?;
            let type_config = {
                let job = state.expect_active(job_id)?;
                self.config.type_config(job.job_type)
            };

            let job = state.expect_active(job_id)?;
            let retry = job.record_failure(error);
            let job_type = job.job_type;

            if retry {
                let delay = retry_delay(type_config.base_delay, job.attempts, self.config.max_delay);
                let available_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                job.reschedule(available_at);
                let job = job.clone();
                state.release_slot(job_type);
                state.pending.entry(job_type).or_default().push_back(job.id.clone());
                FailOutcome::Retrying { job, delay }
            } else {
                job.fail_terminal(error);
                let job = job.clone();
                state.release_slot(job_type);
                state.clear_in_flight(&job);
                FailOutcome::Exhausted(job)
            }
        };

        let job = outcome.job();
        match &outcome {
            FailOutcome::Retrying { delay, .. } => warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Job failed, retrying in {:?}",
                delay
            ),
            FailOutcome::Exhausted(_) => warn!(
                job_id = %job.id,
                attempts = job.attempts,
                "Job failed terminally"
            ),
        }
        self.wake(job.job_type);
        Ok(outcome)
    }

    async fn fail_permanently(&self, job_id: &JobId, error: &str) -> QueueResult<Job> {
        let job = {
            let mut state = self.lock()?;
            let job = state.expect_active(job_id)?;
            job.attempts = (job.attempts + 1).min(job.max_attempts);
            job.fail_terminal(error);
            let job = job.clone();
            state.release_slot(job.job_type);
            state.clear_in_flight(&job);
            job
        };

        warn!(job_id = %job.id, job_type = %job.job_type, "Job failed permanently: {}", error);
        self.wake(job.job_type);
        Ok(job)
    }

    async fn release(&self, job_id: &JobId, delay: Duration) -> QueueResult<()> {
        let job_type = {
            let mut state = self.lock()?;
            let job = state.expect_active(job_id)?;
            let available_at =
                Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            job.reschedule(available_at);
            let job_type = job.job_type;
            state.release_slot(job_type);
            state.pending.entry(job_type).or_default().push_back(job_id.clone());
            job_type
        };

        debug!(job_id = %job_id, "Released job back to pending after {:?}", delay);
        self.wake(job_type);
        Ok(())
    }

    /// Claims never expire in-process; this only reports whether the job
    /// is still active.
    async fn heartbeat(&self, job_id: &JobId) -> QueueResult<()> {
        let mut state = self.lock()?;
        state.expect_active(job_id)?;
        Ok(())
    }

    async fn cancel_file(&self, file_id: &FileId, reason: &str) -> QueueResult<Vec<Job>> {
        let (cancelled_active, touched) = {
            let mut state = self.lock()?;
            let ids = state.by_file.get(file_id).cloned().unwrap_or_default();
            let mut cancelled_active = Vec::new();
            let mut touched = Vec::new();

            for id in ids {
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                let was_active = match job.status {
                    JobStatus::Pending => false,
                    JobStatus::Active => true,
                    JobStatus::Completed | JobStatus::Failed => continue,
                };
                job.fail_terminal(reason);
                let job = job.clone();

                if was_active {
                    state.release_slot(job.job_type);
                    cancelled_active.push(job.clone());
                } else if let Some(queue) = state.pending.get_mut(&job.job_type) {
                    queue.retain(|pending| pending != &job.id);
                }
                state.clear_in_flight(&job);
                touched.push(job.job_type);
            }
            (cancelled_active, touched)
        };

        if !touched.is_empty() {
            info!(file_id = %file_id, jobs = touched.len(), "Cancelled jobs for file: {}", reason);
        }
        for job_type in touched {
            self.wake(job_type);
        }
        Ok(cancelled_active)
    }

    async fn jobs_for_file(&self, file_id: &FileId) -> QueueResult<Vec<Job>> {
        let state = self.lock()?;
        let mut jobs: Vec<Job> = state
            .by_file
            .get(file_id)
            .map(|ids| ids.iter().filter_map(|id| state.jobs.get(id).cloned()).collect())
            .unwrap_or_default();
        jobs.sort_by_key(|j| j.enqueued_at);
        Ok(jobs)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Job> {
        self.lock()?
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| QueueError::job_not_found(job_id))
    }

    async fn depth(&self, job_type: JobType) -> QueueResult<u64> {
        Ok(self
            .lock()?
            .pending
            .get(&job_type)
            .map(|q| q.len() as u64)
            .unwrap_or(0))
    }
}
