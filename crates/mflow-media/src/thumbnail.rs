//! Thumbnail generation.
//!
//! FFmpeg decodes one representative frame to a lossless PNG, then each
//! configured size is resized from that frame and encoded as JPEG.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

use mflow_models::ThumbnailSettings;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::FILTER_TONEMAP_HABLE;

/// One encoded thumbnail.
#[derive(Debug, Clone)]
pub struct RenderedThumbnail {
    /// Configured long-edge size
    pub size: u32,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

/// Decode the representative frame of `input` into `frame_path`.
///
/// Seeks to the first keyframe at or after `seek`; falls back to frame 0
/// when the seek yields nothing (e.g. no keyframe past that point).
pub async fn extract_frame(
    runner: &FfmpegRunner,
    input: &Path,
    seek: Option<f64>,
    tone_map: bool,
    frame_path: &Path,
) -> MediaResult<PathBuf> {
    if let Some(t) = seek {
        let cmd = frame_command(input, Some(t), tone_map, frame_path);
        match runner.run(&cmd).await {
            Ok(()) if has_output(frame_path).await => return Ok(frame_path.to_path_buf()),
            Ok(()) => debug!("No keyframe after {:.3}s, falling back to frame 0", t),
            Err(e @ (MediaError::Cancelled | MediaError::Timeout { .. })) => return Err(e),
            Err(e) => debug!("Seeked frame extraction failed, falling back to frame 0: {}", e),
        }
    }

    let cmd = frame_command(input, None, tone_map, frame_path);
    runner.run(&cmd).await?;

    if !has_output(frame_path).await {
        return Err(MediaError::NoOutput("no decodable video frame".to_string()));
    }
    Ok(frame_path.to_path_buf())
}

fn frame_command(input: &Path, seek: Option<f64>, tone_map: bool, output: &Path) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(input, output).without_progress();
    if let Some(t) = seek {
        cmd = cmd.keyframes_only().seek(t);
    }
    cmd = cmd.single_frame();
    if tone_map {
        cmd = cmd.video_filter(FILTER_TONEMAP_HABLE);
    }
    cmd
}

async fn has_output(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}

/// Resize the decoded frame to every configured size.
pub async fn render_thumbnails(
    frame_path: &Path,
    settings: &ThumbnailSettings,
) -> MediaResult<Vec<RenderedThumbnail>> {
    let frame_path = frame_path.to_path_buf();
    let settings = settings.clone();

    tokio::task::spawn_blocking(move || -> MediaResult<Vec<RenderedThumbnail>> {
        let frame = image::open(&frame_path)?;
        settings
            .sizes
            .iter()
            .map(|&size| encode_thumbnail(&frame, size, settings.jpeg_quality))
            .collect()
    })
    .await
    .map_err(|e| MediaError::internal(format!("thumbnail task panicked: {}", e)))?
}

/// Resize so the long edge is `size` (never upscaling) and encode as JPEG.
pub fn encode_thumbnail(frame: &DynamicImage, size: u32, quality: u8) -> MediaResult<RenderedThumbnail> {
    let (w, h) = frame.dimensions();
    let target = size.min(w.max(h)).max(1);

    let resized = if target == w.max(h) {
        frame.clone()
    } else {
        frame.resize(target, target, FilterType::Lanczos3)
    };

    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::with_capacity((width * height / 4) as usize);
    rgb.write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(quality))?;

    Ok(RenderedThumbnail {
        size,
        width,
        height,
        jpeg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([40, 80, 120])))
    }

    #[test]
    fn test_long_edge_matches_size() {
        let thumb = encode_thumbnail(&frame(1920, 1080), 640, 85).unwrap();
        assert_eq!(thumb.width, 640);
        assert_eq!(thumb.height, 360);
        assert_eq!(&thumb.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_portrait_long_edge_is_height() {
        let thumb = encode_thumbnail(&frame(1080, 1920), 320, 85).unwrap();
        assert_eq!(thumb.height, 320);
        assert_eq!(thumb.width, 180);
    }

    #[test]
    fn test_never_upscales() {
        let thumb = encode_thumbnail(&frame(400, 300), 1280, 85).unwrap();
        assert_eq!((thumb.width, thumb.height), (400, 300));
        assert_eq!(thumb.size, 1280);
    }

    #[test]
    fn test_frame_command_seeks_keyframes() {
        let args = frame_command(Path::new("in.mp4"), Some(3.0), false, Path::new("f.png")).build_args();
        let skip = args.iter().position(|a| a == "-skip_frame").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(skip < input);
        assert!(args.contains(&"3.000".to_string()));

        let hdr = frame_command(Path::new("in.mp4"), None, true, Path::new("f.png")).build_args();
        assert!(!hdr.contains(&"-ss".to_string()));
        assert!(hdr.iter().any(|a| a.contains("tonemap=hable")));
    }
}
