//! H.264/AAC proxy transcodes.

use std::path::Path;
use std::time::Duration;
use tracing::debug;

use mflow_models::{ProxyLadder, ProxyRung};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::filters::{chain, scale_to_height};

/// Everything FFmpeg needs to encode one proxy rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeSpec {
    pub height: u32,
    pub video_codec: String,
    pub video_bitrate_kbps: u32,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Apply the HDR to SDR tone-map ahead of scaling
    pub tone_map: bool,
    pub include_audio: bool,
}

impl TranscodeSpec {
    pub fn for_rung(rung: &ProxyRung, ladder: &ProxyLadder, tone_map: bool, include_audio: bool) -> Self {
        Self {
            height: rung.height,
            video_codec: ladder.video_codec.clone(),
            video_bitrate_kbps: rung.video_bitrate_kbps,
            preset: rung.preset.clone(),
            audio_codec: ladder.audio_codec.clone(),
            audio_bitrate: ladder.audio_bitrate.clone(),
            tone_map,
            include_audio,
        }
    }

    pub fn video_filter(&self) -> String {
        chain(self.tone_map, &[scale_to_height(self.height)])
    }

    /// Build the FFmpeg command writing an MP4 to `output`.
    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(input, output)
            .output_args(["-map", "0:v:0"])
            .video_filter(self.video_filter())
            .video_codec(&self.video_codec)
            .preset(&self.preset)
            .video_bitrate_kbps(self.video_bitrate_kbps)
            .output_args(["-pix_fmt", "yuv420p"]);

        let cmd = if self.include_audio {
            cmd.output_args(["-map", "0:a:0"])
                .audio_codec(&self.audio_codec)
                .audio_bitrate(&self.audio_bitrate)
                .output_args(["-ac", "2"])
        } else {
            cmd.no_audio()
        };

        cmd.output_args(["-movflags", "+faststart"]).format("mp4")
    }
}

/// Wall-clock budget for one rendition: `base + duration * factor`.
pub fn transcode_timeout(base: Duration, seconds_per_source_second: f64, duration: f64) -> Duration {
    let scaled = if duration.is_finite() && duration > 0.0 {
        Duration::from_secs_f64(duration * seconds_per_source_second.max(0.0))
    } else {
        Duration::ZERO
    };
    base + scaled
}

/// Encode `input` into `output` according to `spec`.
pub async fn transcode(
    runner: &FfmpegRunner,
    input: &Path,
    output: &Path,
    spec: &TranscodeSpec,
    duration: f64,
) -> MediaResult<()> {
    let cmd = spec.command(input, output);
    let height = spec.height;

    runner
        .run_with_progress(&cmd, move |progress| {
            debug!(
                height,
                fraction = progress.fraction_of(duration),
                speed = progress.speed,
                "Proxy encode progress"
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflow_models::AssetKind;

    #[test]
    fn test_rung_command() {
        let ladder = ProxyLadder::default();
        let rung = ProxyRung::new(AssetKind::Proxy720p, 720, 2_500);
        let spec = TranscodeSpec::for_rung(&rung, &ladder, false, true);
        let args = spec.command(Path::new("src.mov"), Path::new("out.mp4")).build_args();

        assert!(args.contains(&"scale=-2:720".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"veryfast".to_string()));
        assert!(args.contains(&"2500k".to_string()));
        assert!(args.contains(&"aac".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_hdr_rung_is_tonemapped_without_audio() {
        let ladder = ProxyLadder::default();
        let rung = ProxyRung::new(AssetKind::Proxy1080p, 1080, 5_000);
        let spec = TranscodeSpec::for_rung(&rung, &ladder, true, false);
        let filter = spec.video_filter();
        assert!(filter.contains("tonemap=hable"));
        assert!(filter.ends_with("scale=-2:1080"));

        let args = spec.command(Path::new("src.mov"), Path::new("out.mp4")).build_args();
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"0:a:0".to_string()));
    }

    #[test]
    fn test_timeout_scales_with_duration() {
        let t = transcode_timeout(Duration::from_secs(60), 4.0, 30.0);
        assert_eq!(t, Duration::from_secs(180));
        assert_eq!(
            transcode_timeout(Duration::from_secs(60), 4.0, f64::NAN),
            Duration::from_secs(60)
        );
    }
}
