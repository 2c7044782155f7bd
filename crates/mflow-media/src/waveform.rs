//! Waveform peak extraction.
//!
//! FFmpeg downmixes to mono f32le PCM at the native sample rate and streams
//! it over stdout; peaks are accumulated per window without buffering the
//! whole track.

use std::path::Path;

use mflow_models::{WaveformData, WaveformSettings, WAVEFORM_VERSION};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Streaming per-window peak detector over raw f32le bytes.
#[derive(Debug)]
pub struct PeakAccumulator {
    window_len: usize,
    current_peak: f32,
    current_count: usize,
    peaks: Vec<f32>,
    /// Bytes of a sample split across two reads
    carry: Vec<u8>,
}

impl PeakAccumulator {
    pub fn new(window_len: usize) -> Self {
        Self {
            window_len: window_len.max(1),
            current_peak: 0.0,
            current_count: 0,
            peaks: Vec::new(),
            carry: Vec::with_capacity(4),
        }
    }

    /// Feed a chunk of little-endian f32 samples.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let mut bytes = bytes;

        if !self.carry.is_empty() {
            let need = 4 - self.carry.len();
            let take = need.min(bytes.len());
            self.carry.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.carry.len() < 4 {
                return;
            }
            let sample = f32::from_le_bytes([self.carry[0], self.carry[1], self.carry[2], self.carry[3]]);
            self.carry.clear();
            self.push_sample(sample);
        }

        let chunks = bytes.chunks_exact(4);
        let rest = chunks.remainder();
        for b in chunks {
            self.push_sample(f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        }
        self.carry.extend_from_slice(rest);
    }

    pub fn push_sample(&mut self, sample: f32) {
        let amplitude = if sample.is_finite() { sample.abs() } else { 0.0 };
        if amplitude > self.current_peak {
            self.current_peak = amplitude;
        }
        self.current_count += 1;
        if self.current_count == self.window_len {
            self.peaks.push(self.current_peak);
            self.current_peak = 0.0;
            self.current_count = 0;
        }
    }

    /// Close the final partial window, fit to `expected` windows and scale
    /// so the loudest window is 1.0.
    pub fn finish(mut self, expected: usize) -> Vec<f32> {
        if self.current_count > 0 {
            self.peaks.push(self.current_peak);
        }

        let mut peaks = self.peaks;
        if expected > 0 {
            peaks.resize(expected, 0.0);
        }

        let max = peaks.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            for p in &mut peaks {
                *p = (*p / max).clamp(0.0, 1.0);
            }
        }
        peaks
    }
}

/// Build the PCM decode command.
pub fn pcm_command(input: &Path) -> FfmpegCommand {
    FfmpegCommand::to_stdout(input)
        .without_progress()
        .output_args(["-map", "0:a:0"])
        .no_video()
        .output_args(["-ac", "1"])
        .format("f32le")
}

/// Decode the first audio stream of `input` and compute its waveform.
pub async fn extract_waveform(
    runner: &FfmpegRunner,
    input: &Path,
    sample_rate: u32,
    channels: u32,
    duration: f64,
    settings: &WaveformSettings,
) -> MediaResult<WaveformData> {
    if sample_rate == 0 {
        return Err(MediaError::invalid_media("audio stream has no sample rate"));
    }

    let mut accumulator = PeakAccumulator::new(settings.window_len(sample_rate));
    let mut received = 0usize;

    runner
        .run_with_stdout(&pcm_command(input), |chunk| {
            received += chunk.len();
            accumulator.push_bytes(chunk);
        })
        .await?;

    if received == 0 {
        return Err(MediaError::NoOutput("audio decode produced no samples".to_string()));
    }

    Ok(WaveformData {
        version: WAVEFORM_VERSION,
        sample_rate,
        channels,
        duration,
        peaks: accumulator.finish(settings.expected_peaks(duration)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_peaks_per_window() {
        let mut acc = PeakAccumulator::new(4);
        acc.push_bytes(&pcm(&[0.1, -0.5, 0.2, 0.0, 0.25, 0.1, -0.05, 0.0]));
        let peaks = acc.finish(2);
        assert_eq!(peaks.len(), 2);
        assert!((peaks[0] - 1.0).abs() < 1e-6);
        assert!((peaks[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_samples_split_across_chunks() {
        let bytes = pcm(&[0.5, -1.0, 0.25]);
        let mut acc = PeakAccumulator::new(1);
        for piece in bytes.chunks(3) {
            acc.push_bytes(piece);
        }
        let peaks = acc.finish(3);
        assert_eq!(peaks, vec![0.5, 1.0, 0.25]);
    }

    #[test]
    fn test_density_independent_of_sample_rate() {
        let settings = WaveformSettings::default();
        let duration = 3.0;
        for rate in [8_000u32, 44_100, 48_000] {
            let mut acc = PeakAccumulator::new(settings.window_len(rate));
            let total = (rate as f64 * duration) as usize;
            for i in 0..total {
                acc.push_sample(((i % 100) as f32) / 100.0);
            }
            let peaks = acc.finish(settings.expected_peaks(duration));
            assert_eq!(peaks.len(), 30, "rate {}", rate);
            assert!(peaks.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_partial_window_is_padded_or_truncated() {
        let mut acc = PeakAccumulator::new(10);
        for _ in 0..25 {
            acc.push_sample(0.3);
        }
        assert_eq!(acc.finish(2).len(), 2);

        let mut short = PeakAccumulator::new(10);
        short.push_sample(0.3);
        let peaks = short.finish(4);
        assert_eq!(peaks, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_silence_stays_zero() {
        let mut acc = PeakAccumulator::new(2);
        acc.push_bytes(&pcm(&[0.0; 8]));
        assert_eq!(acc.finish(4), vec![0.0; 4]);
    }

    #[test]
    fn test_pcm_command_targets_stdout() {
        let args = pcm_command(Path::new("a.wav")).build_args();
        assert!(args.contains(&"f32le".to_string()));
        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }
}
