//! FFmpeg CLI wrapper for derived-asset generation.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - A supervised runner with timeout, cancellation and a host-wide process cap
//! - FFprobe parsing into technical metadata, including HDR classification
//! - Thumbnail, proxy, waveform and filmstrip media operations

pub mod command;
pub mod error;
pub mod filmstrip;
pub mod filters;
pub mod limiter;
pub mod metadata;
pub mod probe;
pub mod progress;
pub mod thumbnail;
pub mod transcode;
pub mod waveform;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner, Tool};
pub use error::{MediaError, MediaResult};
pub use filmstrip::{compose_sprite, sample_frames, Filmstrip};
pub use limiter::ProcessLimiter;
pub use metadata::{build_metadata, classify_hdr, extract_metadata};
pub use probe::{probe, ProbeOutput};
pub use progress::FfmpegProgress;
pub use thumbnail::{extract_frame, render_thumbnails, RenderedThumbnail};
pub use transcode::{transcode, transcode_timeout, TranscodeSpec};
pub use waveform::{extract_waveform, PeakAccumulator};
