use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use mflow_media::{compose_sprite, sample_frames, transcode_timeout};
use mflow_models::{AssetKind, FilmstripSettings, JobType};

use super::{Artifact, Processor, ProcessorInput, ProcessorOutput};
use crate::error::{ProcessorError, ProcessorResult};

/// Scrub-preview sprite sheet plus the manifest describing its grid.
pub struct FilmstripProcessor {
    settings: FilmstripSettings,
    timeout_base: Duration,
    timeout_factor: f64,
}

impl FilmstripProcessor {
    pub fn new(settings: FilmstripSettings, timeout_base: Duration, timeout_factor: f64) -> Self {
        Self {
            settings,
            timeout_base,
            timeout_factor,
        }
    }
}

#[async_trait]
impl Processor for FilmstripProcessor {
    fn job_type(&self) -> JobType {
        JobType::Filmstrip
    }

    async fn process(&self, input: &ProcessorInput) -> ProcessorResult<ProcessorOutput> {
        let metadata = input.require_metadata()?;
        if !metadata.has_video {
            return Err(ProcessorError::unsupported("source has no video stream"));
        }

        let settings = self.settings.fitted(metadata.duration);
        if settings.interval_seconds != self.settings.interval_seconds {
            debug!(
                interval_seconds = settings.interval_seconds,
                "Widened filmstrip interval to fit the sprite"
            );
        }
        let total_frames = settings.total_frames(metadata.duration);
        let runner = input
            .runner
            .clone()
            .with_timeout(transcode_timeout(self.timeout_base, self.timeout_factor, metadata.duration));

        let frames = sample_frames(
            &runner,
            &input.source_path,
            &input.work_dir.join("frames"),
            &settings,
            metadata.is_hdr,
        )
        .await?;
        debug!(sampled = frames.len(), total_frames, "Filmstrip frames sampled");

        let filmstrip = compose_sprite(frames, &settings, total_frames).await?;

        Ok(ProcessorOutput::Artifacts(vec![
            Artifact::bytes(AssetKind::FilmstripSprite, filmstrip.sprite_jpeg),
            Artifact::json(AssetKind::FilmstripManifest, &filmstrip.manifest)?,
        ]))
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
            job: Job::new(FileId::from("song"), JobType::Filmstrip, JobPayload::new("uploads/song", "audio/mpeg"), 3),
            file: SourceFile::new("song", "uploads/song", "audio/mpeg", 1),
            metadata,
            source_path: dir.join("source.mp3"),
            work_dir: dir.to_path_buf(),
            runner: FfmpegRunner::new(),
        }
    }

    #[tokio::test]
    async fn test_audio_only_source_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = TechnicalMetadata {
            duration: 30.0,
            has_audio: true,
            sample_rate: Some(44_100),
            ..Default::default()
        };
        let processor = FilmstripProcessor::new(FilmstripSettings::default(), Duration::from_secs(5), 1.0);
        let err = processor.process(&input(dir.path(), Some(metadata))).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_missing_metadata_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let processor = FilmstripProcessor::new(FilmstripSettings::default(), Duration::from_secs(5), 1.0);
        let err = processor.process(&input(dir.path(), None)).await.unwrap_err();
        assert!(err.is_release());
    }
}
