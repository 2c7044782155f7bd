//! Derived-asset worker.
//!
//! This crate provides:
//! - Processors for metadata, thumbnails, proxies, waveforms and filmstrips
//! - Job executor with per-type worker pools and graceful shutdown
//! - Pipeline orchestrator owning each file's status
//! - Cancellation of running jobs
//! - Structured job logging and Prometheus metrics

pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod processors;
pub mod retry;
pub mod staging;

pub use cancel::{CancelGuard, CancelRegistry};
pub use config::{MediaSettings, ProcessTimeouts, WorkerConfig};
pub use error::{ProcessorError, ProcessorResult, WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use orchestrator::Orchestrator;
pub use processors::{Processor, ProcessorInput, ProcessorOutput, ProcessorRegistry};
