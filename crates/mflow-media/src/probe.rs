//! FFprobe JSON output.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::command::{FfmpegRunner, Tool};
use crate::error::{MediaError, MediaResult};

/// Complete ffprobe output for one file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub format: ProbeFormat,
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    /// First decoded frame of each stream, for frame-level side data
    #[serde(default)]
    pub frames: Vec<ProbeFrame>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub profile: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pix_fmt: Option<String>,
    pub bits_per_raw_sample: Option<String>,
    pub color_space: Option<String>,
    pub color_primaries: Option<String>,
    pub color_transfer: Option<String>,
    pub color_range: Option<String>,
    pub field_order: Option<String>,
    pub display_aspect_ratio: Option<String>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub nb_frames: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub bits_per_sample: Option<u32>,
    #[serde(default)]
    pub disposition: HashMap<String, i32>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub side_data_list: Vec<SideData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFrame {
    pub media_type: Option<String>,
    pub stream_index: Option<i32>,
    #[serde(default)]
    pub side_data_list: Vec<SideData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SideData {
    pub side_data_type: Option<String>,
    /// Display matrix rotation in degrees (counter-clockwise)
    pub rotation: Option<f64>,
}

impl ProbeStream {
    pub fn is_video(&self) -> bool {
        self.codec_type.as_deref() == Some("video")
    }

    pub fn is_audio(&self) -> bool {
        self.codec_type.as_deref() == Some("audio")
    }

    /// Cover art embedded in audio files shows up as a video stream.
    pub fn is_attached_picture(&self) -> bool {
        self.disposition.get("attached_pic").copied().unwrap_or(0) == 1
    }

    pub fn has_side_data(&self, kind: &str) -> bool {
        self.side_data_list
            .iter()
            .any(|s| s.side_data_type.as_deref() == Some(kind))
    }

    /// Frame rate, preferring the average over the base rate.
    pub fn frame_rate(&self) -> Option<f64> {
        self.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| self.r_frame_rate.as_deref().and_then(parse_frame_rate))
    }
}

impl ProbeOutput {
    /// Primary video stream, ignoring cover art.
    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.is_video() && !s.is_attached_picture())
    }

    pub fn audio_stream(&self) -> Option<&ProbeStream> {
        self.streams.iter().find(|s| s.is_audio())
    }

    /// Whether the first frame of stream `index` carries the given side data.
    pub fn frame_has_side_data(&self, index: i32, kind: &str) -> bool {
        self.frames
            .iter()
            .filter(|f| f.stream_index == Some(index))
            .flat_map(|f| f.side_data_list.iter())
            .any(|s| s.side_data_type.as_deref() == Some(kind))
    }
}

/// Arguments for a full probe of `path`.
pub fn probe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        "-show_frames".to_string(),
        "-read_intervals".to_string(),
        "%+#1".to_string(),
        path.to_string_lossy().to_string(),
    ]
}

/// Probe a media file.
pub async fn probe(runner: &FfmpegRunner, path: impl AsRef<Path>) -> MediaResult<ProbeOutput> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let stdout = runner.capture(Tool::Ffprobe, probe_args(path)).await?;
    let output: ProbeOutput = serde_json::from_slice(&stdout)?;

    if output.streams.is_empty() {
        return Err(MediaError::invalid_media("no streams found"));
    }

    Ok(output)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|fps: &f64| *fps > 0.0)
}
