//! Technical metadata extraction from ffprobe output.

use chrono::{DateTime, Utc};
use std::path::Path;

use mflow_models::{HdrType, ScanType, TechnicalMetadata};

use crate::command::FfmpegRunner;
use crate::error::MediaResult;
use crate::probe::{probe, ProbeOutput, ProbeStream};

const DOVI_CONFIG: &str = "DOVI configuration record";
const HDR10_PLUS: &str = "HDR Dynamic Metadata SMPTE2094-40 (HDR10+)";
const DISPLAY_MATRIX: &str = "Display Matrix";

/// Probe `path` and build its metadata record.
pub async fn extract_metadata(
    runner: &FfmpegRunner,
    path: impl AsRef<Path>,
) -> MediaResult<TechnicalMetadata> {
    let path = path.as_ref();
    let output = probe(runner, path).await?;
    let size_on_disk = tokio::fs::metadata(path).await.ok().map(|m| m.len());
    Ok(build_metadata(&output, size_on_disk))
}

/// Map probe output to a metadata record.
pub fn build_metadata(output: &ProbeOutput, size_on_disk: Option<u64>) -> TechnicalMetadata {
    let video = output.video_stream();
    let audio = output.audio_stream();

    let duration = parse_f64(output.format.duration.as_deref())
        .or_else(|| {
            output
                .streams
                .iter()
                .filter_map(|s| parse_f64(s.duration.as_deref()))
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    let mut meta = TechnicalMetadata {
        duration,
        has_video: video.is_some(),
        has_audio: audio.is_some(),
        format: output.format.format_name.clone(),
        format_long_name: output.format.format_long_name.clone(),
        bit_rate: parse_u64(output.format.bit_rate.as_deref()),
        size_bytes: parse_u64(output.format.size.as_deref()).or(size_on_disk),
        creation_time: output
            .format
            .tags
            .get("creation_time")
            .and_then(|t| parse_creation_time(t)),
        scan_type: ScanType::Unknown,
        ..Default::default()
    };

    if let Some(v) = video {
        let hdr_type = classify_hdr(output, v);
        let frame_rate = v.frame_rate();

        meta.width = v.width;
        meta.height = v.height;
        meta.frame_rate = frame_rate;
        meta.video_codec = v.codec_name.clone();
        meta.video_profile = v.profile.clone();
        meta.video_bit_rate = parse_u64(v.bit_rate.as_deref());
        meta.pixel_format = v.pix_fmt.clone();
        meta.bit_depth = video_bit_depth(v);
        meta.color_space = v.color_space.clone();
        meta.color_primaries = v.color_primaries.clone();
        meta.color_transfer = v.color_transfer.clone();
        meta.color_range = v.color_range.clone();
        meta.is_hdr = hdr_type.is_hdr();
        meta.hdr_type = hdr_type;
        meta.has_alpha = v.pix_fmt.as_deref().map(pix_fmt_has_alpha).unwrap_or(false);
        meta.rotation = rotation(v);
        meta.display_aspect_ratio = v
            .display_aspect_ratio
            .clone()
            .filter(|dar| dar != "0:1" && dar != "N/A");
        meta.scan_type = scan_type(v.field_order.as_deref());
        meta.frame_count = parse_u64(v.nb_frames.as_deref()).or_else(|| {
            frame_rate
                .filter(|_| duration > 0.0)
                .map(|fps| (duration * fps).round() as u64)
        });
    }

    if let Some(a) = audio {
        meta.audio_codec = a.codec_name.clone();
        meta.audio_bit_rate = parse_u64(a.bit_rate.as_deref());
        meta.sample_rate = a.sample_rate.as_deref().and_then(|s| s.parse().ok());
        meta.channels = a.channels;
        meta.channel_layout = a.channel_layout.clone();
        meta.audio_bit_depth = a
            .bits_per_sample
            .filter(|b| *b > 0)
            .or_else(|| a.bits_per_raw_sample.as_deref().and_then(|b| b.parse().ok()))
            .and_then(|b| u8::try_from(b).ok());
    }

    meta
}

/// HDR classification of the primary video stream.
///
/// Dolby Vision configuration wins over HDR10+ dynamic metadata, which
/// wins over the transfer characteristic alone.
pub fn classify_hdr(output: &ProbeOutput, video: &ProbeStream) -> HdrType {
    if video.has_side_data(DOVI_CONFIG) {
        return HdrType::DolbyVision;
    }

    let transfer = video
        .color_transfer
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();

    if output.frame_has_side_data(video.index, HDR10_PLUS) {
        return HdrType::Hdr10Plus;
    }

    match transfer.as_str() {
        "smpte2084" | "smpte-st-2084" => HdrType::Hdr10,
        "arib-std-b67" => HdrType::Hlg,
        _ => HdrType::Sdr,
    }
}

fn video_bit_depth(stream: &ProbeStream) -> Option<u8> {
    if let Some(bits) = stream
        .bits_per_raw_sample
        .as_deref()
        .and_then(|b| b.parse::<u8>().ok())
        .filter(|b| *b > 0)
    {
        return Some(bits);
    }

    let pix_fmt = stream.pix_fmt.as_deref()?.to_lowercase();
    let depth = if pix_fmt.contains("p010") || pix_fmt.contains("10le") || pix_fmt.contains("10be") {
        10
    } else if pix_fmt.contains("12le") || pix_fmt.contains("12be") {
        12
    } else if pix_fmt.contains("16le") || pix_fmt.contains("16be") || pix_fmt == "rgb48" {
        16
    } else {
        8
    };
    Some(depth)
}

/// Whether an FFmpeg pixel format carries an alpha plane.
pub fn pix_fmt_has_alpha(pix_fmt: &str) -> bool {
    let fmt = pix_fmt.to_lowercase();
    ["yuva", "rgba", "bgra", "argb", "abgr", "gbrap", "ya8", "ya16", "rgb32", "bgr32"]
        .iter()
        .any(|prefix| fmt.starts_with(prefix))
}

/// Clockwise display rotation normalized to 0/90/180/270.
fn rotation(stream: &ProbeStream) -> i32 {
    let degrees = stream
        .tags
        .get("rotate")
        .and_then(|r| r.parse::<f64>().ok())
        .or_else(|| {
            stream
                .side_data_list
                .iter()
                .find(|s| s.side_data_type.as_deref() == Some(DISPLAY_MATRIX))
                .and_then(|s| s.rotation)
                .map(|r| -r)
        })
        .unwrap_or(0.0);

    let quarter_turns = (degrees / 90.0).round() as i32;
    (quarter_turns * 90).rem_euclid(360)
}

fn scan_type(field_order: Option<&str>) -> ScanType {
    match field_order {
        Some("progressive") => ScanType::Progressive,
        Some("tt") | Some("bb") | Some("tb") | Some("bt") => ScanType::Interlaced,
        _ => ScanType::Unknown,
    }
}

fn parse_creation_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_u64(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.parse().ok())
}
