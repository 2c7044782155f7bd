use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use mflow_media::thumbnail::encode_thumbnail;
use mflow_media::{extract_frame, render_thumbnails, MediaError, RenderedThumbnail};
use mflow_models::{AssetKind, JobType, MimeCategory, ThumbnailSettings};

use super::{Artifact, Processor, ProcessorInput, ProcessorOutput};
use crate::error::{ProcessorError, ProcessorResult};

/// Renders the long-edge thumbnail variants of a video frame or an image.
pub struct ThumbnailProcessor {
    settings: ThumbnailSettings,
    timeout: Duration,
}

impl ThumbnailProcessor {
    pub fn new(settings: ThumbnailSettings, timeout: Duration) -> Self {
        Self { settings, timeout }
    }

    async fn from_video(&self, input: &ProcessorInput) -> ProcessorResult<Vec<RenderedThumbnail>> {
        let (duration, tone_map) = input
            .metadata
            .as_ref()
            .map(|m| (m.duration, m.is_hdr))
            .unwrap_or((0.0, false));

        let runner = input.runner.clone().with_timeout(self.timeout);
        let frame_path = input.work_dir.join("frame.png");
        extract_frame(
            &runner,
            &input.source_path,
            self.settings.seek_time(duration),
            tone_map,
            &frame_path,
        )
        .await?;

        Ok(render_thumbnails(&frame_path, &self.settings).await?)
    }

    async fn from_image(&self, input: &ProcessorInput) -> ProcessorResult<Vec<RenderedThumbnail>> {
        let source: PathBuf = input.source_path.clone();
        let settings = self.settings.clone();

        let rendered = tokio::task::spawn_blocking(move || -> Result<Vec<RenderedThumbnail>, MediaError> {
            let image = image::io::Reader::open(&source)?
                .with_guessed_format()?
                .decode()?;
            settings
                .sizes
                .iter()
                .map(|&size| encode_thumbnail(&image, size, settings.jpeg_quality))
                .collect()
        })
        .await
        .map_err(|e| ProcessorError::transcode(format!("thumbnail task panicked: {}", e)))?;

        match rendered {
            Ok(thumbs) => Ok(thumbs),
            Err(MediaError::Image(err)) => {
                debug!(error = %err, "Image decoder rejected source, decoding with ffmpeg");
                self.image_via_ffmpeg(input).await
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Decode an image the `image` crate cannot read (HEIC, AVIF, JPEG XL,
    /// exotic TIFF) through ffmpeg's single-frame path.
    async fn image_via_ffmpeg(&self, input: &ProcessorInput) -> ProcessorResult<Vec<RenderedThumbnail>> {
        let runner = input.runner.clone().with_timeout(self.timeout);
        let frame_path = input.work_dir.join("frame.png");

        let decoded = match extract_frame(&runner, &input.source_path, None, false, &frame_path).await {
            Ok(path) => render_thumbnails(&path, &self.settings).await,
            Err(e) => Err(e),
        };

        // Environment problems are retried; content neither decoder reads is not
        decoded.map_err(|e| match e {
            MediaError::Cancelled => ProcessorError::Cancelled,
            MediaError::Timeout { .. }
            | MediaError::ResourceLimit(_)
            | MediaError::FfmpegNotFound
            | MediaError::Io(_) => ProcessorError::transcode(e.diagnostic()),
            other => ProcessorError::unsupported(format!("undecodable image: {}", other.diagnostic())),
        })
    }
}

#[async_trait]
impl Processor for ThumbnailProcessor {
    fn job_type(&self) -> JobType {
        JobType::Thumbnail
    }

    async fn process(&self, input: &ProcessorInput) -> ProcessorResult<ProcessorOutput> {
        let rendered = match input.file.category() {
            MimeCategory::Image => self.from_image(input).await?,
            MimeCategory::Video => {
                if input.metadata.as_ref().is_some_and(|m| !m.has_video) {
                    return Err(ProcessorError::unsupported("source has no video stream"));
                }
                self.from_video(input).await?
            }
            other => {
                return Err(ProcessorError::unsupported(format!(
                    "no thumbnail for {} sources",
                    other.as_str()
                )))
            }
        };

        let mut artifacts = Vec::with_capacity(rendered.len());
        for thumb in rendered {
            match AssetKind::thumbnail_for_size(thumb.size) {
                Some(kind) => artifacts.push(Artifact::bytes(kind, thumb.jpeg)),
                None => warn!(size = thumb.size, "No asset slot for thumbnail size, skipping"),
            }
        }

        if artifacts.is_empty() {
            return Err(ProcessorError::unsupported("no configured thumbnail size has an asset slot"));
        }
        Ok(ProcessorOutput::Artifacts(artifacts))
    }
}
