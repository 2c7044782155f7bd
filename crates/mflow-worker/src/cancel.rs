//! Cancellation registry of running jobs.
//!
//! Each active job holds a watch channel whose receiver is handed to the
//! FFmpeg runner; flipping it kills the job's external process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use mflow_models::JobId;

#[derive(Debug, Default)]
pub struct CancelRegistry {
    active: Mutex<HashMap<JobId, watch::Sender<bool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<JobId, watch::Sender<bool>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a running job. The entry lives as long as the guard.
    pub fn register(self: &Arc<Self>, job_id: &JobId) -> CancelGuard {
        let (tx, rx) = watch::channel(false);
        self.entries().insert(job_id.clone(), tx);
        CancelGuard {
            registry: Arc::clone(self),
            job_id: job_id.clone(),
            rx,
        }
    }

    /// Signal one job. Returns `false` if it is not running here.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.entries().get(job_id) {
            Some(tx) => {
                tx.send_replace(true);
                debug!(job_id = %job_id, "Cancellation signalled");
                true
            }
            None => false,
        }
    }

    /// Signal every running job.
    pub fn cancel_all(&self) -> usize {
        let entries = self.entries();
        for tx in entries.values() {
            tx.send_replace(true);
        }
        entries.len()
    }

    /// Jobs currently registered.
    pub fn active(&self) -> usize {
        self.entries().len()
    }
}

/// Registration of one running job.
#[derive(Debug)]
pub struct CancelGuard {
    registry: Arc<CancelRegistry>,
    job_id: JobId,
    rx: watch::Receiver<bool>,
}

impl CancelGuard {
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.registry.entries().remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_receiver() {
        let registry = Arc::new(CancelRegistry::new());
        let job = JobId::new();
        let guard = registry.register(&job);
        let rx = guard.receiver();

        assert!(!guard.is_cancelled());
        assert!(registry.cancel(&job));
        assert!(guard.is_cancelled());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let registry = Arc::new(CancelRegistry::new());
        let job = JobId::new();
        {
            let _guard = registry.register(&job);
            assert_eq!(registry.active(), 1);
        }
        assert_eq!(registry.active(), 0);
        assert!(!registry.cancel(&job));
    }

    #[test]
    fn test_cancel_all() {
        let registry = Arc::new(CancelRegistry::new());
        let a = registry.register(&JobId::new());
        let b = registry.register(&JobId::new());
        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
    }
}
