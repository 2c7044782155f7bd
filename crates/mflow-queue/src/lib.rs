//! Per-type derived-asset job queue.
//!
//! This crate provides:
//! - The `JobQueue` contract: dedup, FIFO per type, retry with backoff
//! - An in-process backend for tests and single-node runs
//! - A Redis Streams backend with consumer groups, delayed retries and a DLQ

pub mod backoff;
pub mod config;
pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_queue;

pub use backoff::retry_delay;
pub use config::{QueueConfig, TypeConfig};
pub use error::{QueueError, QueueResult};
pub use memory::InMemoryJobQueue;
pub use queue::{FailOutcome, JobQueue};
pub use redis_queue::RedisJobQueue;
