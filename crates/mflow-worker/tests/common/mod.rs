//! Real media fixtures for tests that need FFmpeg.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tokio::process::Command;

use mflow_media::{check_ffmpeg, check_ffprobe};

/// FFmpeg binary able to encode the default proxy codec, or `None` when
/// the host cannot run media tests.
pub async fn ffmpeg() -> Option<PathBuf> {
    let ffmpeg = check_ffmpeg().ok()?;
    check_ffprobe().ok()?;

    let encoders = Command::new(&ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
        .await
        .ok()?;
    if !String::from_utf8_lossy(&encoders.stdout).contains("libx264") {
        eprintln!("ffmpeg has no libx264, skipping");
        return None;
    }
    Some(ffmpeg)
}

async fn generate(ffmpeg: &Path, args: &[&str], output: &Path) {
    let status = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(args)
        .arg(output)
        .status()
        .await
        .unwrap();
    assert!(status.success(), "fixture generation failed for {}", output.display());
}

/// 960x540 test pattern with a 440 Hz tone.
pub async fn make_clip(ffmpeg: &Path, output: &Path, seconds: u32) {
    let video = format!("testsrc=duration={}:size=960x540:rate=10", seconds);
    let audio = format!("sine=frequency=440:duration={}:sample_rate=48000", seconds);
    generate(
        ffmpeg,
        &[
            "-f", "lavfi", "-i", &video,
            "-f", "lavfi", "-i", &audio,
            "-shortest",
            "-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p",
            "-c:a", "aac",
        ],
        output,
    )
    .await;
}

/// Single-frame Truevision TGA, a format only FFmpeg decodes here.
pub async fn make_tga(ffmpeg: &Path, output: &Path) {
    generate(
        ffmpeg,
        &["-f", "lavfi", "-i", "testsrc=size=320x240:rate=1", "-frames:v", "1"],
        output,
    )
    .await;
}
