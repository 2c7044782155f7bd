use async_trait::async_trait;
use std::time::Duration;

use mflow_media::{extract_waveform, transcode_timeout};
use mflow_models::{AssetKind, JobType, WaveformSettings};

use super::{Artifact, Processor, ProcessorInput, ProcessorOutput};
use crate::error::{ProcessorError, ProcessorResult};

/// Peak-amplitude waveform of the first audio stream.
pub struct WaveformProcessor {
    settings: WaveformSettings,
    timeout_base: Duration,
    timeout_factor: f64,
}

impl WaveformProcessor {
    pub fn new(settings: WaveformSettings, timeout_base: Duration, timeout_factor: f64) -> Self {
        Self {
            settings,
            timeout_base,
            timeout_factor,
        }
    }
}

#[async_trait]
impl Processor for WaveformProcessor {
    fn job_type(&self) -> JobType {
        JobType::Waveform
    }

    async fn process(&self, input: &ProcessorInput) -> ProcessorResult<ProcessorOutput> {
        let metadata = input.require_metadata()?;
        if !metadata.has_audio {
            return Err(ProcessorError::unsupported("source has no audio stream"));
        }
        let sample_rate = metadata
            .sample_rate
            .ok_or_else(|| ProcessorError::unsupported("audio stream has no sample rate"))?;

        let runner = input
            .runner
            .clone()
            .with_timeout(transcode_timeout(self.timeout_base, self.timeout_factor, metadata.duration));

        let waveform = extract_waveform(
            &runner,
            &input.source_path,
            sample_rate,
            metadata.channels.unwrap_or(1),
            metadata.duration,
            &self.settings,
        )
        .await?;

        Ok(ProcessorOutput::Artifacts(vec![Artifact::json(
            AssetKind::WaveformJson,
            &waveform,
        )?]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflow_media::FfmpegRunner;
    use mflow_models::{FileId, Job, JobPayload, SourceFile, TechnicalMetadata};
    use std::path::Path;

    fn input(dir: &Path, metadata: Option<TechnicalMetadata>) -> ProcessorInput {
        ProcessorInput {
            job: Job::new(FileId::from("clip"), JobType::Waveform, JobPayload::new("uploads/clip", "video/mp4"), 3),
            file: SourceFile::new("clip", "uploads/clip", "video/mp4", 1),
            metadata,
            source_path: dir.join("source.mp4"),
            work_dir: dir.to_path_buf(),
            runner: FfmpegRunner::new(),
        }
    }

    fn processor() -> WaveformProcessor {
        WaveformProcessor::new(WaveformSettings::default(), Duration::from_secs(5), 1.0)
    }

    #[tokio::test]
    async fn test_silent_video_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = TechnicalMetadata {
            duration: 10.0,
            has_video: true,
            has_audio: false,
            ..Default::default()
        };
        let err = processor().process(&input(dir.path(), Some(metadata))).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Unsupported(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_metadata_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let err = processor().process(&input(dir.path(), None)).await.unwrap_err();
        assert!(err.is_release());
    }
}
