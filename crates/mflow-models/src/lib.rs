//! Shared data models for the mflow media pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle
//! - Source files and their aggregate status
//! - Technical metadata
//! - Derived assets and the artifact documents clients read
//! - Encoding settings for every derived-asset kind

pub mod asset;
pub mod encoding;
pub mod file;
pub mod job;
pub mod metadata;

// Re-export common types
pub use asset::{AssetKind, DerivedAsset, FilmstripManifest, WaveformData, WAVEFORM_VERSION};
pub use encoding::{FilmstripSettings, ProxyLadder, ProxyRung, ThumbnailSettings, WaveformSettings};
pub use file::{FileId, FileStatus, MimeCategory, SourceFile};
pub use job::{dedup_key, Job, JobId, JobPayload, JobStatus, JobType};
pub use metadata::{HdrType, ScanType, TechnicalMetadata};
