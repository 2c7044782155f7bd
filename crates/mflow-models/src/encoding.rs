//! Derived-asset encoding settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::asset::AssetKind;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Thumbnail long-edge sizes
pub const THUMBNAIL_SIZES: [u32; 3] = [320, 640, 1280];
/// Fraction of the duration at which the representative frame is searched for
pub const THUMBNAIL_SEEK_FRACTION: f64 = 0.10;
/// Clips shorter than this use frame 0
pub const THUMBNAIL_MIN_SEEK_DURATION: f64 = 2.0;

/// Filmstrip tile size and grid
pub const FILMSTRIP_TILE_WIDTH: u32 = 160;
pub const FILMSTRIP_TILE_HEIGHT: u32 = 90;
pub const FILMSTRIP_COLUMNS: u32 = 10;
/// Tallest sprite we produce; JPEG caps either dimension at 65,535
pub const FILMSTRIP_MAX_SPRITE_HEIGHT: u32 = 65_000;

/// Waveform density
pub const WAVEFORM_SAMPLES_PER_SECOND: u32 = 10;

/// One target resolution/bitrate variant of the proxy ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProxyRung {
    /// Asset slot the encode is stored in
    pub kind: AssetKind,
    /// Target height in pixels
    pub height: u32,
    /// Video bitrate in kbit/s
    pub video_bitrate_kbps: u32,
    /// x264 preset
    #[serde(default = "default_preset")]
    pub preset: String,
}

fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}

impl ProxyRung {
    pub fn new(kind: AssetKind, height: u32, video_bitrate_kbps: u32) -> Self {
        Self {
            kind,
            height,
            video_bitrate_kbps,
            preset: default_preset(),
        }
    }

    /// Human label, e.g. "720p" or "4k".
    pub fn label(&self) -> String {
        match self.kind {
            AssetKind::Proxy4k => "4k".to_string(),
            _ => format!("{}p", self.height),
        }
    }
}

/// Proxy transcode ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProxyLadder {
    pub rungs: Vec<ProxyRung>,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for ProxyLadder {
    fn default() -> Self {
        Self {
            rungs: vec![
                ProxyRung::new(AssetKind::Proxy360p, 360, 800),
                ProxyRung::new(AssetKind::Proxy540p, 540, 1_500),
                ProxyRung::new(AssetKind::Proxy720p, 720, 2_500),
                ProxyRung::new(AssetKind::Proxy1080p, 1080, 5_000),
                ProxyRung::new(AssetKind::Proxy4k, 2160, 16_000),
            ],
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl ProxyLadder {
    /// Rungs to encode for a source of the given display height.
    ///
    /// Never upscales. A source shorter than the lowest rung gets a single
    /// rung at its native (even) height in the lowest rung's slot.
    pub fn select(&self, source_height: u32) -> Vec<ProxyRung> {
        let mut rungs: Vec<ProxyRung> = self
            .rungs
            .iter()
            .filter(|r| r.height <= source_height)
            .cloned()
            .collect();

        if rungs.is_empty() {
            if let Some(lowest) = self.rungs.iter().min_by_key(|r| r.height) {
                let native = (source_height & !1).max(2);
                rungs.push(ProxyRung {
                    height: native,
                    ..lowest.clone()
                });
            }
        }

        rungs.sort_by_key(|r| r.height);
        rungs
    }

    /// Override the bitrate of the rung stored in `kind`.
    pub fn with_bitrate(mut self, kind: AssetKind, video_bitrate_kbps: u32) -> Self {
        for rung in self.rungs.iter_mut().filter(|r| r.kind == kind) {
            rung.video_bitrate_kbps = video_bitrate_kbps;
        }
        self
    }

    /// Apply one preset to every rung.
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        let preset = preset.into();
        for rung in &mut self.rungs {
            rung.preset = preset.clone();
        }
        self
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThumbnailSettings {
    /// Long-edge sizes in pixels
    pub sizes: Vec<u32>,
    pub jpeg_quality: u8,
    pub seek_fraction: f64,
    pub min_seek_duration: f64,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            sizes: THUMBNAIL_SIZES.to_vec(),
            jpeg_quality: 85,
            seek_fraction: THUMBNAIL_SEEK_FRACTION,
            min_seek_duration: THUMBNAIL_MIN_SEEK_DURATION,
        }
    }
}

impl ThumbnailSettings {
    /// Timestamp to search for a representative keyframe from, or `None`
    /// when the clip is too short and frame 0 should be used.
    pub fn seek_time(&self, duration: f64) -> Option<f64> {
        if !duration.is_finite() || duration < self.min_seek_duration {
            return None;
        }
        Some(duration * self.seek_fraction)
    }
}

/// Filmstrip sprite settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FilmstripSettings {
    pub interval_seconds: f64,
    pub tile_width: u32,
    pub tile_height: u32,
    pub columns: u32,
    pub jpeg_quality: u8,
}

impl Default for FilmstripSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 1.0,
            tile_width: FILMSTRIP_TILE_WIDTH,
            tile_height: FILMSTRIP_TILE_HEIGHT,
            columns: FILMSTRIP_COLUMNS,
            jpeg_quality: 80,
        }
    }
}

impl FilmstripSettings {
    /// Frames sampled for a source of `duration` seconds:
    /// `floor(duration / interval) + 1`.
    pub fn total_frames(&self, duration: f64) -> u32 {
        if !duration.is_finite() || duration <= 0.0 || self.interval_seconds <= 0.0 {
            return 1;
        }
        (duration / self.interval_seconds).floor() as u32 + 1
    }

    /// Grid rows for `total_frames`: `ceil(total_frames / columns)`.
    pub fn rows(&self, total_frames: u32) -> u32 {
        total_frames.div_ceil(self.columns.max(1))
    }

    /// Most tiles a sprite can hold without exceeding
    /// [`FILMSTRIP_MAX_SPRITE_HEIGHT`].
    pub fn max_frames(&self) -> u32 {
        let max_rows = (FILMSTRIP_MAX_SPRITE_HEIGHT / self.tile_height.max(1)).max(1);
        max_rows * self.columns.max(1)
    }

    /// Settings for a source of `duration` seconds. Long sources get a wider
    /// sampling interval so the grid fits in one sprite.
    pub fn fitted(&self, duration: f64) -> Self {
        let max_frames = self.max_frames();
        if self.total_frames(duration) <= max_frames || max_frames < 2 {
            return self.clone();
        }

        // floor(duration / interval) + 1 <= max_frames
        let mut interval = (duration / (max_frames - 1) as f64 * 1000.0).ceil() / 1000.0;
        while (duration / interval).floor() as u32 + 1 > max_frames {
            interval += 0.001;
        }

        Self {
            interval_seconds: interval.max(self.interval_seconds),
            ..self.clone()
        }
    }
}

/// Waveform extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WaveformSettings {
    pub samples_per_second: u32,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            samples_per_second: WAVEFORM_SAMPLES_PER_SECOND,
        }
    }
}

impl WaveformSettings {
    /// PCM samples per peak window at `sample_rate`.
    pub fn window_len(&self, sample_rate: u32) -> usize {
        ((sample_rate / self.samples_per_second.max(1)) as usize).max(1)
    }

    /// Number of peaks for a source of `duration` seconds.
    pub fn expected_peaks(&self, duration: f64) -> usize {
        if !duration.is_finite() || duration <= 0.0 {
            return 0;
        }
        ((duration * self.samples_per_second as f64).round() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heights(rungs: &[ProxyRung]) -> Vec<u32> {
        rungs.iter().map(|r| r.height).collect()
    }

    #[test]
    fn test_ladder_never_upscales() {
        let ladder = ProxyLadder::default();
        assert_eq!(heights(&ladder.select(800)), vec![360, 540, 720]);
        assert_eq!(heights(&ladder.select(1080)), vec![360, 540, 720, 1080]);
        assert_eq!(heights(&ladder.select(1440)), vec![360, 540, 720, 1080]);
        assert_eq!(heights(&ladder.select(2160)), vec![360, 540, 720, 1080, 2160]);
    }

    #[test]
    fn test_ladder_sub_360_source() {
        let ladder = ProxyLadder::default();
        let rungs = ladder.select(241);
        assert_eq!(rungs.len(), 1);
        assert_eq!(rungs[0].height, 240);
        assert_eq!(rungs[0].kind, AssetKind::Proxy360p);
    }

    #[test]
    fn test_ladder_overrides() {
        let ladder = ProxyLadder::default()
            .with_bitrate(AssetKind::Proxy720p, 3_000)
            .with_preset("medium");
        let rung = ladder
            .rungs
            .iter()
            .find(|r| r.kind == AssetKind::Proxy720p)
            .unwrap();
        assert_eq!(rung.video_bitrate_kbps, 3_000);
        assert!(ladder.rungs.iter().all(|r| r.preset == "medium"));
        assert_eq!(rung.label(), "720p");
    }

    #[test]
    fn test_thumbnail_seek_time() {
        let settings = ThumbnailSettings::default();
        assert_eq!(settings.seek_time(1.5), None);
        let t = settings.seek_time(30.0).unwrap();
        assert!((t - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_filmstrip_grid_math() {
        let settings = FilmstripSettings::default();
        assert_eq!(settings.total_frames(30.0), 31);
        assert_eq!(settings.rows(31), 4);
        assert_eq!(settings.total_frames(9.99), 10);
        assert_eq!(settings.rows(10), 1);
        assert_eq!(settings.total_frames(0.4), 1);
    }

    #[test]
    fn test_waveform_density_independent_of_rate() {
        let settings = WaveformSettings::default();
        assert_eq!(settings.window_len(8_000), 800);
        assert_eq!(settings.window_len(44_100), 4_410);
        assert_eq!(settings.window_len(48_000), 4_800);
        assert_eq!(settings.expected_peaks(12.34), 123);
    }

    #[test]
    fn test_long_source_widens_filmstrip_interval() {
        let settings = FilmstripSettings::default();
        assert_eq!(settings.max_frames(), 7220);

        let short = settings.fitted(3600.0);
        assert_eq!(short, settings);

        // Three hours at 1s would need 1081 rows of 90px
        let fitted = settings.fitted(3.0 * 3600.0);
        assert!(fitted.interval_seconds > 1.0);
        let total = fitted.total_frames(3.0 * 3600.0);
        assert!(total <= settings.max_frames());
        assert!(fitted.rows(total) * fitted.tile_height <= FILMSTRIP_MAX_SPRITE_HEIGHT);
    }

}
