//! Host-wide cap on concurrently running FFmpeg/FFprobe processes.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{MediaError, MediaResult};

/// Counting limiter shared by every runner in the process.
///
/// Per-type worker concurrency bounds jobs; this bounds child processes,
/// since a single proxy job can spawn several encodes.
#[derive(Debug, Clone)]
pub struct ProcessLimiter {
    semaphore: Arc<Semaphore>,
    max_processes: usize,
}

impl ProcessLimiter {
    pub fn new(max_processes: usize) -> Self {
        let max_processes = max_processes.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_processes)),
            max_processes,
        }
    }

    /// Wait for a process slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> MediaResult<OwnedSemaphorePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MediaError::ResourceLimit("process limiter closed".to_string()))?;
        metrics::gauge!("mflow_ffmpeg_processes_active").set(self.in_use() as f64);
        Ok(permit)
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.max_processes - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limiter_caps_permits() {
        let limiter = ProcessLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_use(), 2);

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            limiter.acquire(),
        )
        .await;
        assert!(pending.is_err());

        drop(a);
        assert_eq!(limiter.in_use(), 1);
        assert!(limiter.acquire().await.is_ok());
    }

    #[test]
    fn test_zero_is_clamped() {
        assert_eq!(ProcessLimiter::new(0).max_processes(), 1);
    }
}
