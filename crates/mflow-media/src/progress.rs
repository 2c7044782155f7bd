//! FFmpeg `-progress` snapshots.

use serde::{Deserialize, Serialize};

/// One block of FFmpeg `-progress pipe:2` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    pub frame: u64,
    pub fps: f64,
    /// Encoded output position in milliseconds
    pub out_time_ms: i64,
    /// Output position as HH:MM:SS.micro
    pub out_time: String,
    /// Encoding speed relative to realtime
    pub speed: f64,
    /// Set on the final `progress=end` block
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Output position in seconds.
    pub fn out_time_seconds(&self) -> f64 {
        self.out_time_ms.max(0) as f64 / 1000.0
    }

    /// Fraction of `duration` seconds encoded so far, in [0, 1].
    pub fn fraction_of(&self, duration: f64) -> f64 {
        if self.is_complete {
            return 1.0;
        }
        if !duration.is_finite() || duration <= 0.0 {
            return 0.0;
        }
        (self.out_time_seconds() / duration).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_of_duration() {
        let progress = FfmpegProgress {
            out_time_ms: 7_500,
            ..Default::default()
        };
        assert!((progress.fraction_of(30.0) - 0.25).abs() < 1e-9);
        assert_eq!(progress.fraction_of(0.0), 0.0);
        assert_eq!(progress.fraction_of(5.0), 1.0);

        let done = FfmpegProgress {
            is_complete: true,
            ..Default::default()
        };
        assert_eq!(done.fraction_of(30.0), 1.0);
    }
}
