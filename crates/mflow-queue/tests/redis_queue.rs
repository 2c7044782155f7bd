//! Redis Streams queue tests.
//!
//! Run with a local Redis: `cargo test -p mflow-queue -- --ignored`.

use std::time::Duration;

use mflow_models::{FileId, JobPayload, JobStatus, JobType};
use mflow_queue::{FailOutcome, JobQueue, QueueConfig, QueueError, RedisJobQueue, TypeConfig};

async fn queue(config: QueueConfig) -> RedisJobQueue {
    let mut config = config;
    config.redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    config.key_prefix = format!("mflow-test-{}", uuid::Uuid::new_v4());
    let queue = RedisJobQueue::new(config).unwrap();
    queue.init().await.unwrap();
    queue
}

fn payload() -> JobPayload {
    JobPayload::new("uploads/f1.mp4", "video/mp4")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_dequeue_ack() {
    let queue = queue(QueueConfig::default()).await;
    let file = FileId::from("f1");

    let id = queue.enqueue(&file, JobType::Metadata, payload()).await.unwrap();
    assert_eq!(queue.enqueue(&file, JobType::Metadata, payload()).await.unwrap(), id);
    assert_eq!(queue.depth(JobType::Metadata).await.unwrap(), 1);

    let job = queue
        .dequeue(JobType::Metadata, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.status, JobStatus::Active);

    let done = queue.ack(&id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(queue.depth(JobType::Metadata).await.unwrap(), 0);

    // The pair is free again once the job completed
    let next = queue.enqueue(&file, JobType::Metadata, payload()).await.unwrap();
    assert_ne!(next, id);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_then_dead_letter() {
    let config = QueueConfig::default().with_type(
        JobType::Thumbnail,
        TypeConfig::new(8, 2, Duration::from_millis(50)),
    );
    let queue = queue(config).await;
    let file = FileId::from("f1");
    let id = queue.enqueue(&file, JobType::Thumbnail, payload()).await.unwrap();

    let job = queue.dequeue(JobType::Thumbnail, Duration::from_secs(1)).await.unwrap().unwrap();
    let outcome = queue.fail(&job.id, "decode error").await.unwrap();
    assert!(matches!(outcome, FailOutcome::Retrying { .. }));

    let retried = queue
        .dequeue(JobType::Thumbnail, Duration::from_secs(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retried.id, id);
    assert_eq!(retried.attempts, 1);

    let outcome = queue.fail(&retried.id, "decode error").await.unwrap();
    assert!(outcome.is_exhausted());
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.get(&id).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_cancel_file() {
    let queue = queue(QueueConfig::default()).await;
    let file = FileId::from("f1");
    queue.enqueue(&file, JobType::Metadata, payload()).await.unwrap();
    queue.enqueue(&file, JobType::Proxy, payload()).await.unwrap();
    let active = queue.dequeue(JobType::Metadata, Duration::from_secs(1)).await.unwrap().unwrap();

    let stopped = queue.cancel_file(&file, "cancelled").await.unwrap();
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].id, active.id);

    assert!(queue.dequeue(JobType::Proxy, Duration::ZERO).await.unwrap().is_none());
    let jobs = queue.jobs_for_file(&file).await.unwrap();
    assert!(jobs.iter().all(|j| j.status == JobStatus::Failed));
}

/// Two workers sharing one queue, with a short visibility timeout.
async fn worker_pair(visibility: Duration) -> (RedisJobQueue, RedisJobQueue) {
    let mut config = QueueConfig::default();
    config.redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    config.key_prefix = format!("mflow-test-{}", uuid::Uuid::new_v4());
    config.visibility_timeout = visibility;

    let mut first = config.clone();
    first.consumer_name = "worker-a".to_string();
    let mut second = config;
    second.consumer_name = "worker-b".to_string();

    let a = RedisJobQueue::new(first).unwrap();
    a.init().await.unwrap();
    (a, RedisJobQueue::new(second).unwrap())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_heartbeat_keeps_long_job_from_being_reclaimed() {
    let (a, b) = worker_pair(Duration::from_millis(300)).await;
    let file = FileId::from("f1");
    let id = a.enqueue(&file, JobType::Proxy, payload()).await.unwrap();
    let job = a.dequeue(JobType::Proxy, Duration::from_secs(1)).await.unwrap().unwrap();

    // Runs well past the visibility timeout while heartbeating
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        a.heartbeat(&job.id).await.unwrap();
        assert!(b.dequeue(JobType::Proxy, Duration::ZERO).await.unwrap().is_none());
    }

    // A silent worker loses the job to the next one
    tokio::time::sleep(Duration::from_millis(400)).await;
    let reclaimed = b.dequeue(JobType::Proxy, Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, id);
    assert!(matches!(a.heartbeat(&job.id).await, Err(QueueError::LeaseLost(_))));
    b.heartbeat(&job.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_cancel_racing_ack_settles_once() {
    let (a, b) = worker_pair(Duration::from_secs(60)).await;
    let file = FileId::from("f1");

    for _ in 0..10 {
        // Keep enqueue times apart so no round supersedes the next
        tokio::time::sleep(Duration::from_millis(5)).await;
        let id = a.enqueue(&file, JobType::Thumbnail, payload()).await.unwrap();
        let job = a.dequeue(JobType::Thumbnail, Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(job.id, id);

        let (acked, stopped) = tokio::join!(a.ack(&id), b.cancel_file(&file, "cancelled"));
        let stopped = stopped.unwrap();
        let final_status = a.get(&id).await.unwrap().status;

        match acked {
            Ok(_) => {
                assert_eq!(final_status, JobStatus::Completed);
                assert!(stopped.is_empty());
            }
            Err(QueueError::InvalidState { .. }) => {
                assert_eq!(final_status, JobStatus::Failed);
                assert_eq!(stopped.len(), 1);
            }
            Err(e) => panic!("unexpected ack error: {}", e),
        }
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_stale_in_flight_marker_is_replaced() {
    let queue = queue(QueueConfig::default()).await;
    let file = FileId::from("f1");

    // Marker left behind by a worker that died mid-enqueue
    let client = redis::Client::open(queue.config().redis_url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let marker = format!("{}:inflight:{}:{}", queue.config().key_prefix, file, JobType::Waveform);
    let _: () = redis::cmd("SET")
        .arg(&marker)
        .arg("job-that-never-existed")
        .query_async(&mut conn)
        .await
        .unwrap();

    let id = queue.enqueue(&file, JobType::Waveform, payload()).await.unwrap();
    assert_ne!(id.as_str(), "job-that-never-existed");
    let job = queue.dequeue(JobType::Waveform, Duration::from_secs(1)).await.unwrap().unwrap();
    assert_eq!(job.id, id);
}
