//! Derived-asset processors.
//!
//! A processor turns a staged source file into technical metadata or a set
//! of artifacts. Persisting the result (object uploads, record upserts) is
//! the worker's job, so processors never touch storage.

mod filmstrip;
mod metadata;
mod proxy;
mod thumbnail;
mod waveform;

pub use filmstrip::FilmstripProcessor;
pub use metadata::MetadataProcessor;
pub use proxy::{ProxyPlan, ProxyProcessor};
pub use thumbnail::ThumbnailProcessor;
pub use waveform::WaveformProcessor;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use mflow_media::FfmpegRunner;
use mflow_models::{AssetKind, Job, JobType, SourceFile, TechnicalMetadata};

use crate::config::WorkerConfig;
use crate::error::{ProcessorError, ProcessorResult};

/// Everything one processor run gets to work with.
#[derive(Debug, Clone)]
pub struct ProcessorInput {
    pub job: Job,
    pub file: SourceFile,
    /// Written by the metadata job; `None` only for the metadata job itself
    pub metadata: Option<TechnicalMetadata>,
    /// Staged local copy of the source
    pub source_path: PathBuf,
    /// Scratch directory removed after the attempt
    pub work_dir: PathBuf,
    /// Runner wired to this job's cancel signal and the host process cap
    pub runner: FfmpegRunner,
}

impl ProcessorInput {
    /// Metadata, or `DependencyNotReady` if the metadata job has not
    /// written it yet.
    pub fn require_metadata(&self) -> ProcessorResult<&TechnicalMetadata> {
        self.metadata.as_ref().ok_or_else(|| {
            ProcessorError::DependencyNotReady(format!("no technical metadata for {}", self.file.file_id))
        })
    }
}

/// Payload of one produced artifact.
#[derive(Debug, Clone)]
pub enum ArtifactBody {
    Bytes(Bytes),
    /// File inside the attempt's scratch directory
    File(PathBuf),
}

/// One artifact, stored under `kind.storage_key(file_id)`.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: AssetKind,
    pub body: ArtifactBody,
}

impl Artifact {
    pub fn bytes(kind: AssetKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: ArtifactBody::Bytes(data.into()),
        }
    }

    pub fn file(kind: AssetKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            body: ArtifactBody::File(path.into()),
        }
    }

    /// JSON document artifact.
    pub fn json<T: serde::Serialize>(kind: AssetKind, value: &T) -> ProcessorResult<Self> {
        let data = serde_json::to_vec(value)
            .map_err(|e| ProcessorError::transcode(format!("serialize {}: {}", kind, e)))?;
        Ok(Self::bytes(kind, data))
    }
}

#[derive(Debug, Clone)]
pub enum ProcessorOutput {
    Metadata(TechnicalMetadata),
    Artifacts(Vec<Artifact>),
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn process(&self, input: &ProcessorInput) -> ProcessorResult<ProcessorOutput>;
}

/// Processors by job type.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobType, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five FFmpeg-backed processors configured from `config`.
    pub fn standard(config: &WorkerConfig) -> Self {
        let media = &config.media;
        let timeouts = &config.timeouts;

        let mut registry = Self::new();
        registry.register(Arc::new(MetadataProcessor::new(timeouts.probe)));
        registry.register(Arc::new(ThumbnailProcessor::new(
            media.thumbnail.clone(),
            timeouts.thumbnail,
        )));
        registry.register(Arc::new(ProxyProcessor::new(
            media.ladder.clone(),
            timeouts.proxy_base,
            timeouts.proxy_factor,
        )));
        registry.register(Arc::new(WaveformProcessor::new(
            media.waveform.clone(),
            timeouts.analysis_base,
            timeouts.analysis_factor,
        )));
        registry.register(Arc::new(FilmstripProcessor::new(
            media.filmstrip.clone(),
            timeouts.analysis_base,
            timeouts.analysis_factor,
        )));
        registry
    }

    /// Register a processor, replacing any other of the same type.
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> &mut Self {
        self.processors.insert(processor.job_type(), processor);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Processor>> {
        self.processors.get(&job_type).cloned()
    }

    /// Registered job types, in pipeline order.
    pub fn job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|t| self.processors.contains_key(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_every_type() {
        let registry = ProcessorRegistry::standard(&WorkerConfig::default());
        assert_eq!(registry.job_types(), JobType::ALL.to_vec());
        for job_type in JobType::ALL {
            assert_eq!(registry.get(job_type).unwrap().job_type(), job_type);
        }
    }
}
