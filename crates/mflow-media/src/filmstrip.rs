//! Filmstrip sprite sheets for scrub previews.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageOutputFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use mflow_models::encoding::FILMSTRIP_MAX_SPRITE_HEIGHT;
use mflow_models::{FilmstripManifest, FilmstripSettings};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{chain, fit_box, sample_every};

/// Encoded sprite and the manifest describing its grid.
#[derive(Debug, Clone)]
pub struct Filmstrip {
    pub sprite_jpeg: Vec<u8>,
    pub manifest: FilmstripManifest,
}

pub fn sample_command(input: &Path, frames_dir: &Path, settings: &FilmstripSettings, tone_map: bool) -> FfmpegCommand {
    let filter = chain(
        tone_map,
        &[
            sample_every(settings.interval_seconds),
            fit_box(settings.tile_width, settings.tile_height),
        ],
    );

    FfmpegCommand::new(input, frames_dir.join("%05d.jpg"))
        .output_args(["-map", "0:v:0"])
        .video_filter(filter)
        .output_args(["-q:v", "3"])
        .no_audio()
}

/// Sample tiles from `input` into `frames_dir`, returned in order.
pub async fn sample_frames(
    runner: &FfmpegRunner,
    input: &Path,
    frames_dir: &Path,
    settings: &FilmstripSettings,
    tone_map: bool,
) -> MediaResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(frames_dir).await?;
    runner
        .run(&sample_command(input, frames_dir, settings, tone_map))
        .await?;

    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(frames_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jpg") {
            frames.push(path);
        }
    }
    frames.sort();

    if frames.is_empty() {
        return Err(MediaError::NoOutput("no filmstrip frames sampled".to_string()));
    }
    Ok(frames)
}

/// Compose `total_frames` tiles into one sprite.
///
/// Extra sampled frames are dropped; missing trailing frames repeat the
/// last one sampled.
pub async fn compose_sprite(
    frames: Vec<PathBuf>,
    settings: &FilmstripSettings,
    total_frames: u32,
) -> MediaResult<Filmstrip> {
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || -> MediaResult<Filmstrip> {
        let tiles = frames
            .iter()
            .take(total_frames as usize)
            .map(image::open)
            .collect::<Result<Vec<_>, _>>()?;
        build_sprite(&tiles, &settings, total_frames)
    })
    .await
    .map_err(|e| MediaError::internal(format!("filmstrip task panicked: {}", e)))?
}

/// Lay tiles out row-major on a `columns`-wide grid and encode as JPEG.
pub fn build_sprite(tiles: &[DynamicImage], settings: &FilmstripSettings, total_frames: u32) -> MediaResult<Filmstrip> {
    let last = tiles
        .last()
        .ok_or_else(|| MediaError::NoOutput("no filmstrip frames sampled".to_string()))?;

    let total_frames = total_frames.max(1);
    let columns = settings.columns.max(1);
    let rows = settings.rows(total_frames);
    let (tile_w, tile_h) = (settings.tile_width, settings.tile_height);
    if rows.saturating_mul(tile_h) > FILMSTRIP_MAX_SPRITE_HEIGHT {
        return Err(MediaError::invalid_media(format!(
            "{} filmstrip frames need a {}px sprite; widen the interval",
            total_frames,
            rows.saturating_mul(tile_h)
        )));
    }

    let mut sprite = RgbImage::new(columns * tile_w, rows * tile_h);
    let manifest = FilmstripManifest {
        width: tile_w,
        height: tile_h,
        columns,
        rows,
        total_frames,
        interval_seconds: settings.interval_seconds,
    };

    for index in 0..total_frames {
        let tile = tiles.get(index as usize).unwrap_or(last);
        let tile = if tile.dimensions() == (tile_w, tile_h) {
            tile.to_rgb8()
        } else {
            tile.resize_exact(tile_w, tile_h, FilterType::Triangle).to_rgb8()
        };
        let (col, row) = manifest.cell(index);
        imageops::overlay(&mut sprite, &tile, (col * tile_w) as i64, (row * tile_h) as i64);
    }

    let mut sprite_jpeg = Vec::new();
    DynamicImage::ImageRgb8(sprite).write_to(
        &mut Cursor::new(&mut sprite_jpeg),
        ImageOutputFormat::Jpeg(settings.jpeg_quality),
    )?;

    Ok(Filmstrip { sprite_jpeg, manifest })
}
