//! Job queue on Redis Streams.
//!
//! Layout under the configured prefix:
//! - `{p}:jobs:{type}`: stream per job type, read through one consumer group
//! - `{p}:job:{id}`: job record as JSON
//! - `{p}:messages:{type}`: job id -> stream entry id of the claimed delivery
//! - `{p}:delayed:{type}`: sorted set of jobs waiting out a retry backoff
//! - `{p}:inflight:{file}:{type}`: the one pending or active job of a pair
//! - `{p}:done:{file}:{type}`: enqueue time (ms) of the latest completed job
//! - `{p}:file:{file}:jobs`: every job id of a file
//! - `{p}:dlq`: terminally failed jobs
//!
//! Job records change only through compare-and-set scripts, so concurrent
//! ack, fail and cancel calls on one job never lose an update. Pending jobs
//! reach the stream through the delayed set, which the same script writes.
//!
//! Per-type concurrency is enforced by the worker's semaphores; this backend
//! only hands out entries.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, info, warn};

use mflow_models::{FileId, Job, JobId, JobPayload, JobStatus, JobType};

use crate::backoff::retry_delay;
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{FailOutcome, JobQueue};

/// Longest single XREADGROUP block, so delayed jobs are promoted promptly.
const MAX_BLOCK: Duration = Duration::from_secs(1);

/// Stale deliveries reclaimed per dequeue.
const RECLAIM_BATCH: usize = 10;

/// Compare-and-set rounds before an update gives up.
const MAX_CAS_ATTEMPTS: usize = 16;

/// Write a job record if it still holds `ARGV[1]`. A record left pending is
/// added to the delayed set in the same step.
const UPDATE_JOB_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if ARGV[3] ~= '' then
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
end
return 1
"#;

/// Create a job together with its in-flight marker, file index entry and
/// stream delivery. An existing marker wins unless it equals `ARGV[3]`.
const ENQUEUE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and current ~= ARGV[3] then
    return {0, current}
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('SADD', KEYS[3], ARGV[1])
local message_id = redis.call('XADD', KEYS[4], '*', 'job_id', ARGV[1])
return {1, message_id}
"#;

const CLEAR_MARKER_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

const RAISE_DONE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current or tonumber(current) < tonumber(ARGV[1]) then
    redis.call('SET', KEYS[1], ARGV[1])
end
return 1
"#;

const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    return redis.call('XADD', KEYS[2], '*', 'job_id', ARGV[1])
end
return false
"#;

/// Reset the idle time of a delivery, but only while this consumer owns it.
const HEARTBEAT_SCRIPT: &str = r#"
local owned = redis.call('XPENDING', KEYS[1], ARGV[1], ARGV[3], ARGV[3], 1, ARGV[2])
if #owned == 0 then
    return 0
end
redis.call('XCLAIM', KEYS[1], ARGV[1], ARGV[2], 0, ARGV[3], 'JUSTID')
return 1
"#;

fn invalid_state(job: &Job, expected: JobStatus) -> QueueError {
    QueueError::InvalidState {
        job_id: job.id.to_string(),
        status: job.status.as_str().to_string(),
        expected: expected.as_str().to_string(),
    }
}

fn ensure_active(job: &Job) -> QueueResult<()> {
    if job.status != JobStatus::Active {
        return Err(invalid_state(job, JobStatus::Active));
    }
    Ok(())
}

pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create the consumer group of every type stream if missing.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        for job_type in JobType::ALL {
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(self.stream_key(job_type))
                .arg(&self.config.consumer_group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(_) => info!(job_type = %job_type, "Created consumer group: {}", self.config.consumer_group),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!(job_type = %job_type, "Consumer group already exists: {}", self.config.consumer_group);
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }

        Ok(())
    }

    /// Number of terminally failed jobs recorded in the DLQ stream.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(self.dlq_key()).await?;
        Ok(len)
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn stream_key(&self, job_type: JobType) -> String {
        format!("{}:jobs:{}", self.config.key_prefix, job_type)
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, job_id)
    }

    fn messages_key(&self, job_type: JobType) -> String {
        format!("{}:messages:{}", self.config.key_prefix, job_type)
    }

    fn delayed_key(&self, job_type: JobType) -> String {
        format!("{}:delayed:{}", self.config.key_prefix, job_type)
    }

    fn inflight_key(&self, file_id: &FileId, job_type: JobType) -> String {
        format!("{}:inflight:{}:{}", self.config.key_prefix, file_id, job_type)
    }

    fn done_key(&self, file_id: &FileId, job_type: JobType) -> String {
        format!("{}:done:{}:{}", self.config.key_prefix, file_id, job_type)
    }

    fn file_jobs_key(&self, file_id: &FileId) -> String {
        format!("{}:file:{}:jobs", self.config.key_prefix, file_id)
    }

    fn dlq_key(&self) -> String {
        format!("{}:dlq", self.config.key_prefix)
    }

    async fn load_job(&self, conn: &mut MultiplexedConnection, job_id: &JobId) -> QueueResult<Job> {
        let raw: Option<String> = conn.get(self.job_key(job_id)).await?;
        let raw = raw.ok_or_else(|| QueueError::job_not_found(job_id))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `change` to the stored job and write it back, retrying when
    /// another writer got there first. `change` returns `false` to leave
    /// the record untouched.
    async fn update_job<F>(
        &self,
        conn: &mut MultiplexedConnection,
        job_id: &JobId,
        mut change: F,
    ) -> QueueResult<(Job, bool)>
    where
        F: FnMut(&mut Job) -> QueueResult<bool> + Send,
    {
        let key = self.job_key(job_id);
        let script = Script::new(UPDATE_JOB_SCRIPT);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let raw: Option<String> = conn.get(&key).await?;
            let raw = raw.ok_or_else(|| QueueError::job_not_found(job_id))?;
            let mut job: Job = serde_json::from_str(&raw)?;
            if !change(&mut job)? {
                return Ok((job, false));
            }

            let score = if job.status == JobStatus::Pending {
                job.available_at.timestamp_millis().to_string()
            } else {
                String::new()
            };
            let swapped: i32 = script
                .key(&key)
                .key(self.delayed_key(job.job_type))
                .arg(&raw)
                .arg(serde_json::to_string(&job)?)
                .arg(score)
                .arg(job.id.as_str())
                .invoke_async(conn)
                .await?;
            if swapped == 1 {
                return Ok((job, true));
            }
            debug!(job_id = %job_id, "Job record changed concurrently, retrying update");
        }

        Err(QueueError::Conflict(job_id.to_string()))
    }

    async fn ack_message(&self, conn: &mut MultiplexedConnection, job_type: JobType, message_id: &str) -> QueueResult<()> {
        let stream = self.stream_key(job_type);
        redis::cmd("XACK")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;
        redis::cmd("XDEL")
            .arg(&stream)
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    /// Ack the delivery a job was claimed through, if any.
    async fn settle_delivery(&self, conn: &mut MultiplexedConnection, job: &Job) -> QueueResult<()> {
        let messages = self.messages_key(job.job_type);
        let message_id: Option<String> = conn.hget(&messages, job.id.as_str()).await?;
        if let Some(message_id) = message_id {
            self.ack_message(conn, job.job_type, &message_id).await?;
            let _: () = conn.hdel(&messages, job.id.as_str()).await?;
        }
        Ok(())
    }

    async fn clear_in_flight(&self, conn: &mut MultiplexedConnection, job: &Job) -> QueueResult<()> {
        let _: i32 = Script::new(CLEAR_MARKER_SCRIPT)
            .key(self.inflight_key(&job.file_id, job.job_type))
            .arg(job.id.as_str())
            .invoke_async(conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, conn: &mut MultiplexedConnection, job: &Job, error: &str) -> QueueResult<()> {
        redis::cmd("XADD")
            .arg(self.dlq_key())
            .arg("*")
            .arg("job")
            .arg(serde_json::to_string(job)?)
            .arg("error")
            .arg(error)
            .query_async::<()>(conn)
            .await?;
        warn!(job_id = %job.id, job_type = %job.job_type, "Moved job to DLQ: {}", error);
        Ok(())
    }

    /// Move delayed jobs whose backoff has elapsed onto the stream.
    async fn promote_due(&self, conn: &mut MultiplexedConnection, job_type: JobType) -> QueueResult<()> {
        let delayed = self.delayed_key(job_type);
        let due: Vec<String> = conn
            .zrangebyscore(&delayed, "-inf", Utc::now().timestamp_millis())
            .await?;

        let script = Script::new(PROMOTE_SCRIPT);
        for id in due {
            // Only the worker that removes the entry publishes it
            let _: Option<String> = script
                .key(&delayed)
                .key(self.stream_key(job_type))
                .arg(&id)
                .invoke_async(conn)
                .await?;
        }
        Ok(())
    }

    /// Claim deliveries left unacked past the visibility timeout by a
    /// crashed worker.
    async fn reclaim_stale(&self, conn: &mut MultiplexedConnection, job_type: JobType) -> QueueResult<Vec<redis::streams::StreamId>> {
        let stream = self.stream_key(job_type);
        let min_idle = self.config.visibility_timeout.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle)
            .arg("-")
            .arg("+")
            .arg(RECLAIM_BATCH)
            .query_async(conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(min_idle);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let claimed: redis::streams::StreamClaimReply = cmd.query_async(conn).await?;

        for entry in &claimed.ids {
            info!(job_type = %job_type, message_id = %entry.id, "Reclaimed stale delivery");
        }
        Ok(claimed.ids)
    }

    async fn read_new(
        &self,
        conn: &mut MultiplexedConnection,
        job_type: JobType,
        block: Duration,
    ) -> QueueResult<Vec<redis::streams::StreamId>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1);
        // BLOCK 0 waits forever
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(self.stream_key(job_type)).arg(">");

        let reply: Option<redis::streams::StreamReadReply> = cmd.query_async(conn).await?;
        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    /// Turn a delivery into a claimed job, or settle it and return `None`
    /// when the job no longer needs to run.
    async fn claim_delivery(
        &self,
        conn: &mut MultiplexedConnection,
        job_type: JobType,
        entry: &redis::streams::StreamId,
    ) -> QueueResult<Option<Job>> {
        let job_id = match entry.map.get("job_id") {
            Some(redis::Value::BulkString(raw)) => JobId::from_string(String::from_utf8_lossy(raw)),
            _ => {
                warn!(message_id = %entry.id, "Stream entry without job id");
                self.ack_message(conn, job_type, &entry.id).await?;
                return Ok(None);
            }
        };

        let job = match self.load_job(conn, &job_id).await {
            Ok(job) => job,
            Err(e @ (QueueError::JobNotFound(_) | QueueError::Json(_))) => {
                warn!(job_id = %job_id, "Dropping unreadable job: {}", e);
                self.ack_message(conn, job_type, &entry.id).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let done: Option<i64> = conn.get(self.done_key(&job.file_id, job.job_type)).await?;
        let superseded = done.is_some_and(|done| done >= job.enqueued_at.timestamp_millis());

        let (job, changed) = self
            .update_job(conn, &job_id, |job| {
                if !job.status.is_in_flight() {
                    return Ok(false);
                }
                if superseded {
                    job.complete();
                } else {
                    job.start();
                }
                Ok(true)
            })
            .await?;

        if !changed {
            debug!(job_id = %job.id, status = %job.status, "Dropping delivery of settled job");
            self.ack_message(conn, job_type, &entry.id).await?;
            return Ok(None);
        }

        if superseded {
            debug!(job_id = %job.id, "Skipping job superseded by a completed run");
            self.ack_message(conn, job_type, &entry.id).await?;
            self.clear_in_flight(conn, &job).await?;
            return Ok(None);
        }

        let _: () = conn
            .hset(self.messages_key(job_type), job.id.as_str(), &entry.id)
            .await?;
        Ok(Some(job))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, file_id: &FileId, job_type: JobType, payload: JobPayload) -> QueueResult<JobId> {
        let mut conn = self.conn().await?;
        let max_attempts = self.config.type_config(job_type).max_attempts;
        let job = Job::new(file_id.clone(), job_type, payload, max_attempts);
        let raw = serde_json::to_string(&job)?;
        let script = Script::new(ENQUEUE_SCRIPT);

        // Marker of a settled or vanished job that may be taken over
        let mut stale_marker = String::new();
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (created, value): (i32, String) = script
                .key(self.inflight_key(file_id, job_type))
                .key(self.job_key(&job.id))
                .key(self.file_jobs_key(file_id))
                .key(self.stream_key(job_type))
                .arg(job.id.as_str())
                .arg(&raw)
                .arg(&stale_marker)
                .invoke_async(&mut conn)
                .await?;

            if created == 1 {
                info!(
                    job_id = %job.id,
                    file_id = %file_id,
                    job_type = %job_type,
                    "Enqueued job with message ID {}",
                    value
                );
                return Ok(job.id);
            }

            match self.load_job(&mut conn, &JobId::from_string(&value)).await {
                Ok(existing) if existing.status.is_in_flight() => {
                    debug!(job_id = %existing.id, file_id = %file_id, job_type = %job_type, "Duplicate enqueue ignored");
                    return Ok(existing.id);
                }
                Ok(_) | Err(QueueError::JobNotFound(_)) => {
                    warn!(marker = %value, file_id = %file_id, job_type = %job_type, "Replacing stale in-flight marker");
                    stale_marker = value;
                }
                Err(e) => return Err(e),
            }
        }

        Err(QueueError::enqueue_failed(format!(
            "in-flight marker for {}:{} kept changing",
            file_id, job_type
        )))
    }

    async fn dequeue(&self, job_type: JobType, wait: Duration) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            self.promote_due(&mut conn, job_type).await?;

            for entry in self.reclaim_stale(&mut conn, job_type).await? {
                if let Some(job) = self.claim_delivery(&mut conn, job_type, &entry).await? {
                    return Ok(Some(job));
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            for entry in self.read_new(&mut conn, job_type, remaining.min(MAX_BLOCK)).await? {
                if let Some(job) = self.claim_delivery(&mut conn, job_type, &entry).await? {
                    return Ok(Some(job));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, job_id: &JobId) -> QueueResult<Job> {
        let mut conn = self.conn().await?;
        let (job, changed) = self
            .update_job(&mut conn, job_id, |job| match job.status {
                JobStatus::Completed => Ok(false),
                JobStatus::Active => {
                    job.complete();
                    Ok(true)
                }
                _ => Err(invalid_state(job, JobStatus::Active)),
            })
            .await?;
        if !changed {
            return Ok(job);
        }

        self.settle_delivery(&mut conn, &job).await?;
        self.clear_in_flight(&mut conn, &job).await?;
        let _: i32 = Script::new(RAISE_DONE_SCRIPT)
            .key(self.done_key(&job.file_id, job.job_type))
            .arg(job.enqueued_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        debug!(job_id = %job.id, job_type = %job.job_type, "Acknowledged job");
        Ok(job)
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<FailOutcome> {
        let mut conn = self.conn().await?;
        let mut retry_in: Option<Duration> = None;

        let (job, _) = self
            .update_job(&mut conn, job_id, |job| {
                ensure_active(job)?;
                retry_in = None;
                if job.record_failure(error) {
                    let base = self.config.type_config(job.job_type).base_delay;
                    let delay = retry_delay(base, job.attempts, self.config.max_delay);
                    job.reschedule(
                        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
                    );
                    retry_in = Some(delay);
                } else {
                    job.fail_terminal(error);
                }
                Ok(true)
            })
            .await?;

        self.settle_delivery(&mut conn, &job).await?;

        match retry_in {
            Some(delay) => {
                warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    "Job failed, retrying in {:?}",
                    delay
                );
                Ok(FailOutcome::Retrying { job, delay })
            }
            None => {
                self.clear_in_flight(&mut conn, &job).await?;
                self.dead_letter(&mut conn, &job, error).await?;
                Ok(FailOutcome::Exhausted(job))
            }
        }
    }

    async fn fail_permanently(&self, job_id: &JobId, error: &str) -> QueueResult<Job> {
        let mut conn = self.conn().await?;
        let (job, _) = self
            .update_job(&mut conn, job_id, |job| {
                ensure_active(job)?;
                job.attempts = (job.attempts + 1).min(job.max_attempts);
                job.fail_terminal(error);
                Ok(true)
            })
            .await?;

        self.settle_delivery(&mut conn, &job).await?;
        self.clear_in_flight(&mut conn, &job).await?;
        self.dead_letter(&mut conn, &job, error).await?;
        Ok(job)
    }

    async fn release(&self, job_id: &JobId, delay: Duration) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let available_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let (job, _) = self
            .update_job(&mut conn, job_id, |job| {
                ensure_active(job)?;
                job.reschedule(available_at);
                Ok(true)
            })
            .await?;

        self.settle_delivery(&mut conn, &job).await?;
        debug!(job_id = %job_id, "Released job back to pending after {:?}", delay);
        Ok(())
    }

    async fn heartbeat(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let job = self.load_job(&mut conn, job_id).await?;
        ensure_active(&job)?;

        let message_id: Option<String> = conn.hget(self.messages_key(job.job_type), job_id.as_str()).await?;
        let Some(message_id) = message_id else {
            return Err(QueueError::LeaseLost(job_id.to_string()));
        };

        let owned: i32 = Script::new(HEARTBEAT_SCRIPT)
            .key(self.stream_key(job.job_type))
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(&message_id)
            .invoke_async(&mut conn)
            .await?;
        if owned == 0 {
            return Err(QueueError::LeaseLost(job_id.to_string()));
        }
        Ok(())
    }

    async fn cancel_file(&self, file_id: &FileId, reason: &str) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let mut stopped = Vec::new();
        let mut cancelled = 0usize;

        for job in self.jobs_for_file(file_id).await? {
            if !job.status.is_in_flight() {
                continue;
            }

            let mut was_active = false;
            let (job, changed) = match self
                .update_job(&mut conn, &job.id, |job| {
                    was_active = match job.status {
                        JobStatus::Pending => false,
                        JobStatus::Active => true,
                        JobStatus::Completed | JobStatus::Failed => return Ok(false),
                    };
                    job.fail_terminal(reason);
                    Ok(true)
                })
                .await
            {
                Ok(result) => result,
                Err(QueueError::JobNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !changed {
                continue;
            }

            if was_active {
                self.settle_delivery(&mut conn, &job).await?;
            } else {
                let _: () = conn.zrem(self.delayed_key(job.job_type), job.id.as_str()).await?;
            }
            self.clear_in_flight(&mut conn, &job).await?;
            cancelled += 1;

            if was_active {
                stopped.push(job);
            }
        }

        if cancelled > 0 {
            info!(file_id = %file_id, jobs = cancelled, "Cancelled jobs for file: {}", reason);
        }
        Ok(stopped)
    }

    async fn jobs_for_file(&self, file_id: &FileId) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(self.file_jobs_key(file_id)).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_job(&mut conn, &JobId::from_string(id)).await {
                Ok(job) => jobs.push(job),
                Err(QueueError::JobNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        jobs.sort_by_key(|j| j.enqueued_at);
        Ok(jobs)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Job> {
        let mut conn = self.conn().await?;
        self.load_job(&mut conn, job_id).await
    }

    async fn depth(&self, job_type: JobType) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let stream = self.stream_key(job_type);

        let len: u64 = conn.xlen(&stream).await?;
        let delivered: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;
        let delayed: u64 = conn.zcard(self.delayed_key(job_type)).await?;

        Ok(len.saturating_sub(delivered.count() as u64) + delayed)
    }
}
