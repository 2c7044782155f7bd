//! Worker configuration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use mflow_models::{
    AssetKind, FilmstripSettings, JobType, ProxyLadder, ThumbnailSettings, WaveformSettings,
};
use mflow_queue::QueueConfig;

/// Wall-clock budgets of external processes.
#[derive(Debug, Clone)]
pub struct ProcessTimeouts {
    pub probe: Duration,
    pub thumbnail: Duration,
    /// Fixed part of a proxy rung's budget
    pub proxy_base: Duration,
    /// Seconds of encode budget per second of source
    pub proxy_factor: f64,
    /// Fixed part of the waveform and filmstrip budgets
    pub analysis_base: Duration,
    /// Seconds of decode budget per second of source
    pub analysis_factor: f64,
}

impl Default for ProcessTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(30),
            thumbnail: Duration::from_secs(60),
            proxy_base: Duration::from_secs(120),
            proxy_factor: 4.0,
            analysis_base: Duration::from_secs(60),
            analysis_factor: 1.0,
        }
    }
}

impl ProcessTimeouts {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            probe: env_secs("WORKER_PROBE_TIMEOUT_SECS").unwrap_or(defaults.probe),
            thumbnail: env_secs("WORKER_THUMBNAIL_TIMEOUT_SECS").unwrap_or(defaults.thumbnail),
            proxy_base: env_secs("WORKER_PROXY_TIMEOUT_BASE_SECS").unwrap_or(defaults.proxy_base),
            proxy_factor: env_parse("WORKER_PROXY_TIMEOUT_FACTOR").unwrap_or(defaults.proxy_factor),
            analysis_base: env_secs("WORKER_ANALYSIS_TIMEOUT_BASE_SECS").unwrap_or(defaults.analysis_base),
            analysis_factor: env_parse("WORKER_ANALYSIS_TIMEOUT_FACTOR").unwrap_or(defaults.analysis_factor),
        }
    }
}

/// Encoding settings of every derived-asset kind.
#[derive(Debug, Clone, Default)]
pub struct MediaSettings {
    pub ladder: ProxyLadder,
    pub thumbnail: ThumbnailSettings,
    pub filmstrip: FilmstripSettings,
    pub waveform: WaveformSettings,
}

impl MediaSettings {
    /// Defaults overridden by environment variables.
    ///
    /// `PROXY_BITRATES` takes `kind=kbps` pairs, e.g.
    /// `proxy_720p=3000,proxy_1080p=6000`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(preset) = std::env::var("PROXY_PRESET") {
            settings.ladder = settings.ladder.with_preset(preset);
        }
        if let Ok(pairs) = std::env::var("PROXY_BITRATES") {
            for (kind, kbps) in parse_bitrates(&pairs) {
                settings.ladder = settings.ladder.with_bitrate(kind, kbps);
            }
        }

        if let Ok(sizes) = std::env::var("THUMBNAIL_SIZES") {
            let sizes: Vec<u32> = sizes.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if !sizes.is_empty() {
                settings.thumbnail.sizes = sizes;
            }
        }
        if let Some(quality) = env_parse("THUMBNAIL_JPEG_QUALITY") {
            settings.thumbnail.jpeg_quality = quality;
        }

        if let Some(interval) = env_parse::<f64>("FILMSTRIP_INTERVAL_SECS").filter(|i| *i > 0.0) {
            settings.filmstrip.interval_seconds = interval;
        }
        if let Some(columns) = env_parse::<u32>("FILMSTRIP_COLUMNS").filter(|c| *c > 0) {
            settings.filmstrip.columns = columns;
        }

        if let Some(rate) = env_parse::<u32>("WAVEFORM_SAMPLES_PER_SECOND").filter(|r| *r > 0) {
            settings.waveform.samples_per_second = rate;
        }

        settings
    }
}

fn parse_bitrates(pairs: &str) -> Vec<(AssetKind, u32)> {
    pairs
        .split(',')
        .filter_map(|pair| {
            let (kind, kbps) = pair.split_once('=')?;
            Some((kind.trim().parse().ok()?, kbps.trim().parse().ok()?))
        })
        .collect()
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum simultaneously active jobs per type
    pub concurrency: HashMap<JobType, usize>,
    /// Host-wide cap on concurrently running FFmpeg/FFprobe processes
    pub max_ffmpeg_processes: usize,
    /// How long one dequeue call waits for work
    pub poll_wait: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Delay before a job whose metadata is missing is offered again
    pub dependency_retry_delay: Duration,
    /// How often queue depth gauges are refreshed
    pub depth_report_interval: Duration,
    /// How often a running job renews its claim; well under the queue's
    /// visibility timeout
    pub heartbeat_interval: Duration,
    pub timeouts: ProcessTimeouts,
    pub media: MediaSettings,
    /// Prometheus exporter listen address; disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            concurrency: JobType::ALL
                .iter()
                .map(|t| (*t, queue.type_config(*t).concurrency))
                .collect(),
            max_ffmpeg_processes: 8,
            poll_wait: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/mflow"),
            dependency_retry_delay: Duration::from_secs(5),
            depth_report_interval: Duration::from_secs(15),
            heartbeat_interval: heartbeat_for(queue.visibility_timeout),
            timeouts: ProcessTimeouts::default(),
            media: MediaSettings::default(),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Per-type concurrency shares the `QUEUE_{TYPE}_CONCURRENCY` variables
    /// with the queue so both sides agree on the budget.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let queue = QueueConfig::from_env();

        Self {
            concurrency: JobType::ALL
                .iter()
                .map(|t| (*t, queue.type_config(*t).concurrency))
                .collect(),
            max_ffmpeg_processes: env_parse("WORKER_MAX_FFMPEG").unwrap_or(defaults.max_ffmpeg_processes),
            poll_wait: env_parse("WORKER_POLL_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_wait),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            dependency_retry_delay: env_secs("WORKER_DEPENDENCY_RETRY_SECS")
                .unwrap_or(defaults.dependency_retry_delay),
            depth_report_interval: env_secs("WORKER_DEPTH_REPORT_SECS")
                .unwrap_or(defaults.depth_report_interval),
            heartbeat_interval: env_secs("WORKER_HEARTBEAT_SECS")
                .unwrap_or_else(|| heartbeat_for(queue.visibility_timeout)),
            timeouts: ProcessTimeouts::from_env(),
            media: MediaSettings::from_env(),
            metrics_addr: env_parse("METRICS_ADDR"),
        }
    }

    /// Active-job budget of `job_type`.
    pub fn concurrency_for(&self, job_type: JobType) -> usize {
        self.concurrency.get(&job_type).copied().unwrap_or(1).max(1)
    }

    pub fn with_concurrency(mut self, job_type: JobType, concurrency: usize) -> Self {
        self.concurrency.insert(job_type, concurrency.max(1));
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }
}

/// A quarter of the visibility timeout. Three beats may be missed before
/// the claim expires.
fn heartbeat_for(visibility_timeout: Duration) -> Duration {
    (visibility_timeout / 4).max(Duration::from_secs(1))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets_match_queue() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency_for(JobType::Proxy), 2);
        assert_eq!(config.concurrency_for(JobType::Metadata), 8);
        assert_eq!(config.timeouts.probe, Duration::from_secs(30));
        assert_eq!(config.timeouts.thumbnail, Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(450));
        assert!(config.heartbeat_interval < QueueConfig::default().visibility_timeout);
    }

    #[test]
    fn test_parse_bitrates_skips_garbage() {
        let parsed = parse_bitrates("proxy_720p=3000, bogus=1, proxy_4k=abc,proxy_360p = 700");
        assert_eq!(
            parsed,
            vec![(AssetKind::Proxy720p, 3000), (AssetKind::Proxy360p, 700)]
        );
    }
}
