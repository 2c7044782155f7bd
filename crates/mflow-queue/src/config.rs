//! Queue configuration.

use std::collections::HashMap;
use std::time::Duration;

use mflow_models::JobType;

/// Budget and retry policy of one job type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeConfig {
    /// Maximum simultaneously active jobs of this type
    pub concurrency: usize,
    /// Attempts before terminal failure
    pub max_attempts: u32,
    /// Backoff base; the retry after attempt `n` waits `base_delay * 2^n`
    pub base_delay: Duration,
}

impl TypeConfig {
    pub fn new(concurrency: usize, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Defaults per type. Proxy is the most CPU-intensive and gets the
    /// smallest pool.
    pub fn default_for(job_type: JobType) -> Self {
        match job_type {
            JobType::Metadata => Self::new(8, 3, Duration::from_secs(2)),
            JobType::Thumbnail => Self::new(8, 3, Duration::from_secs(5)),
            JobType::Proxy => Self::new(2, 3, Duration::from_secs(30)),
            JobType::Waveform => Self::new(4, 3, Duration::from_secs(10)),
            JobType::Filmstrip => Self::new(4, 3, Duration::from_secs(10)),
        }
    }

    fn from_env(job_type: JobType) -> Self {
        let defaults = Self::default_for(job_type);
        let prefix = format!("QUEUE_{}", job_type.as_str().to_uppercase());
        Self::new(
            env_parse(&format!("{}_CONCURRENCY", prefix)).unwrap_or(defaults.concurrency),
            env_parse(&format!("{}_MAX_ATTEMPTS", prefix)).unwrap_or(defaults.max_attempts),
            env_parse(&format!("{}_BASE_DELAY_MS", prefix))
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
        )
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix of every Redis key and stream
    pub key_prefix: String,
    /// Consumer group shared by all workers
    pub consumer_group: String,
    /// This worker's consumer name
    pub consumer_name: String,
    /// Upper bound on retry backoff
    pub max_delay: Duration,
    /// Unacked stream entries idle longer than this are reclaimed. Workers
    /// heartbeat running jobs to reset the idle time.
    pub visibility_timeout: Duration,
    /// Per-type budgets and retry policy
    pub types: HashMap<JobType, TypeConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "mflow".to_string(),
            consumer_group: "mflow:workers".to_string(),
            consumer_name: default_consumer_name(),
            max_delay: Duration::from_secs(600),
            visibility_timeout: Duration::from_secs(1800),
            types: JobType::ALL
                .iter()
                .map(|t| (*t, TypeConfig::default_for(*t)))
                .collect(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            consumer_name: std::env::var("QUEUE_CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            max_delay: env_parse("QUEUE_MAX_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_delay),
            visibility_timeout: env_parse("QUEUE_VISIBILITY_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            types: JobType::ALL
                .iter()
                .map(|t| (*t, TypeConfig::from_env(*t)))
                .collect(),
        }
    }

    /// Policy for `job_type`, falling back to the built-in default.
    pub fn type_config(&self, job_type: JobType) -> TypeConfig {
        self.types
            .get(&job_type)
            .cloned()
            .unwrap_or_else(|| TypeConfig::default_for(job_type))
    }

    /// Override one type's policy.
    pub fn with_type(mut self, job_type: JobType, config: TypeConfig) -> Self {
        self.types.insert(job_type, config);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

fn default_consumer_name() -> String {
    format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
