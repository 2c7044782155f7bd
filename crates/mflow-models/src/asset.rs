//! Derived assets and the artifact shapes clients consume.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::file::FileId;

/// Slot a derived artifact occupies on its file. One row per (file, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    #[serde(rename = "thumbnail_320")]
    Thumbnail320,
    #[serde(rename = "thumbnail_640")]
    Thumbnail640,
    #[serde(rename = "thumbnail_1280")]
    Thumbnail1280,
    #[serde(rename = "proxy_360p")]
    Proxy360p,
    #[serde(rename = "proxy_540p")]
    Proxy540p,
    #[serde(rename = "proxy_720p")]
    Proxy720p,
    #[serde(rename = "proxy_1080p")]
    Proxy1080p,
    #[serde(rename = "proxy_4k")]
    Proxy4k,
    WaveformJson,
    FilmstripSprite,
    FilmstripManifest,
}

impl AssetKind {
    pub const ALL: [AssetKind; 11] = [
        AssetKind::Thumbnail320,
        AssetKind::Thumbnail640,
        AssetKind::Thumbnail1280,
        AssetKind::Proxy360p,
        AssetKind::Proxy540p,
        AssetKind::Proxy720p,
        AssetKind::Proxy1080p,
        AssetKind::Proxy4k,
        AssetKind::WaveformJson,
        AssetKind::FilmstripSprite,
        AssetKind::FilmstripManifest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Thumbnail320 => "thumbnail_320",
            AssetKind::Thumbnail640 => "thumbnail_640",
            AssetKind::Thumbnail1280 => "thumbnail_1280",
            AssetKind::Proxy360p => "proxy_360p",
            AssetKind::Proxy540p => "proxy_540p",
            AssetKind::Proxy720p => "proxy_720p",
            AssetKind::Proxy1080p => "proxy_1080p",
            AssetKind::Proxy4k => "proxy_4k",
            AssetKind::WaveformJson => "waveform_json",
            AssetKind::FilmstripSprite => "filmstrip_sprite",
            AssetKind::FilmstripManifest => "filmstrip_manifest",
        }
    }

    /// Thumbnail slot for a configured long-edge size.
    pub fn thumbnail_for_size(size: u32) -> Option<Self> {
        match size {
            320 => Some(AssetKind::Thumbnail320),
            640 => Some(AssetKind::Thumbnail640),
            1280 => Some(AssetKind::Thumbnail1280),
            _ => None,
        }
    }

    /// File extension of the stored artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            AssetKind::Thumbnail320
            | AssetKind::Thumbnail640
            | AssetKind::Thumbnail1280
            | AssetKind::FilmstripSprite => "jpg",
            AssetKind::Proxy360p
            | AssetKind::Proxy540p
            | AssetKind::Proxy720p
            | AssetKind::Proxy1080p
            | AssetKind::Proxy4k => "mp4",
            AssetKind::WaveformJson | AssetKind::FilmstripManifest => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self.extension() {
            "jpg" => "image/jpeg",
            "mp4" => "video/mp4",
            _ => "application/json",
        }
    }

    /// Deterministic storage key for this slot, so redelivery overwrites
    /// rather than accumulates objects.
    pub fn storage_key(&self, file_id: &FileId) -> String {
        format!("derived/{}/{}.{}", file_id, self.as_str(), self.extension())
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown asset kind: {}", s))
    }
}

/// A derived artifact recorded on a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DerivedAsset {
    pub file_id: FileId,
    pub kind: AssetKind,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl DerivedAsset {
    pub fn new(file_id: FileId, kind: AssetKind, storage_key: impl Into<String>) -> Self {
        Self {
            file_id,
            kind,
            storage_key: storage_key.into(),
            created_at: Utc::now(),
        }
    }
}

/// Current waveform document version.
pub const WAVEFORM_VERSION: u32 = 1;

/// Waveform document rendered directly by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WaveformData {
    pub version: u32,
    /// Source sample rate in Hz
    pub sample_rate: u32,
    pub channels: u32,
    /// Duration in seconds
    pub duration: f64,
    /// Peak absolute amplitude per window, normalized to [0, 1]
    pub peaks: Vec<f32>,
}

/// Manifest describing a filmstrip sprite sheet.
///
/// Frame `i` sits at `column = i % columns`, `row = i / columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilmstripManifest {
    /// Tile width in pixels
    pub width: u32,
    /// Tile height in pixels
    pub height: u32,
    pub columns: u32,
    pub rows: u32,
    pub total_frames: u32,
    pub interval_seconds: f64,
}

impl FilmstripManifest {
    /// Grid cell (column, row) of frame `index`.
    pub fn cell(&self, index: u32) -> (u32, u32) {
        (index % self.columns, index / self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_kind_serde_names() {
        for kind in AssetKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<AssetKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_storage_key_is_deterministic() {
        let file = FileId::from("abc");
        assert_eq!(
            AssetKind::Proxy720p.storage_key(&file),
            "derived/abc/proxy_720p.mp4"
        );
        assert_eq!(
            AssetKind::FilmstripManifest.storage_key(&file),
            AssetKind::FilmstripManifest.storage_key(&file)
        );
    }

    #[test]
    fn test_manifest_cell() {
        let manifest = FilmstripManifest {
            width: 160,
            height: 90,
            columns: 10,
            rows: 4,
            total_frames: 31,
            interval_seconds: 1.0,
        };
        assert_eq!(manifest.cell(0), (0, 0));
        assert_eq!(manifest.cell(9), (9, 0));
        assert_eq!(manifest.cell(30), (0, 3));
    }
}
