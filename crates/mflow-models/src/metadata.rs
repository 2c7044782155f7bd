//! Technical metadata snapshot written by the metadata job.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// HDR signalling detected on the primary video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum HdrType {
    #[default]
    Sdr,
    Hdr10,
    Hlg,
    Hdr10Plus,
    DolbyVision,
}

impl HdrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HdrType::Sdr => "sdr",
            HdrType::Hdr10 => "hdr10",
            HdrType::Hlg => "hlg",
            HdrType::Hdr10Plus => "hdr10_plus",
            HdrType::DolbyVision => "dolby_vision",
        }
    }

    pub fn is_hdr(&self) -> bool {
        !matches!(self, HdrType::Sdr)
    }
}

impl fmt::Display for HdrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Interlacing of the primary video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    #[default]
    Progressive,
    Interlaced,
    Unknown,
}

/// Container and stream facts for one file.
///
/// Every processor other than the metadata processor reads this record;
/// nothing here is written after the metadata job succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalMetadata {
    /// Duration in seconds
    pub duration: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frames per second
    pub frame_rate: Option<f64>,
    pub video_codec: Option<String>,
    pub video_profile: Option<String>,
    /// Video stream bitrate in bits/second
    pub video_bit_rate: Option<u64>,
    pub pixel_format: Option<String>,
    pub bit_depth: Option<u8>,
    pub color_space: Option<String>,
    pub color_primaries: Option<String>,
    pub color_transfer: Option<String>,
    pub color_range: Option<String>,
    #[serde(rename = "isHDR")]
    pub is_hdr: bool,
    #[serde(rename = "hdrType")]
    pub hdr_type: HdrType,
    pub has_alpha: bool,
    /// Display rotation in degrees (0, 90, 180, 270)
    pub rotation: i32,
    pub display_aspect_ratio: Option<String>,
    pub scan_type: ScanType,
    pub frame_count: Option<u64>,
    pub audio_codec: Option<String>,
    /// Audio stream bitrate in bits/second
    pub audio_bit_rate: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub audio_bit_depth: Option<u8>,
    pub has_audio: bool,
    pub has_video: bool,
    /// Container format short name(s), e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format: Option<String>,
    pub format_long_name: Option<String>,
    /// Container bitrate in bits/second
    pub bit_rate: Option<u64>,
    pub size_bytes: Option<u64>,
    pub creation_time: Option<DateTime<Utc>>,
}

impl TechnicalMetadata {
    /// Frame dimensions after applying display rotation.
    pub fn display_dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = (self.width?, self.height?);
        if self.rotation.rem_euclid(180) == 90 {
            Some((h, w))
        } else {
            Some((w, h))
        }
    }

    /// Display height used to pick proxy rungs.
    pub fn display_height(&self) -> Option<u32> {
        self.display_dimensions().map(|(_, h)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_dimensions_rotated() {
        let meta = TechnicalMetadata {
            width: Some(1920),
            height: Some(1080),
            rotation: -90,
            ..Default::default()
        };
        assert_eq!(meta.display_dimensions(), Some((1080, 1920)));
        assert_eq!(meta.display_height(), Some(1920));
    }

    #[test]
    fn test_serde_field_names() {
        let meta = TechnicalMetadata {
            is_hdr: true,
            hdr_type: HdrType::Hdr10,
            frame_rate: Some(25.0),
            ..Default::default()
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["isHDR"], true);
        assert_eq!(value["hdrType"], "hdr10");
        assert_eq!(value["frameRate"], 25.0);
        assert_eq!(value.as_object().unwrap().len(), 33);
    }
}
