//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::limiter::ProcessLimiter;
use crate::progress::FfmpegProgress;

/// Lines of stderr kept for diagnostics.
pub const STDERR_TAIL_LINES: usize = 20;

/// External binaries the runner can spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
}

impl Tool {
    pub fn binary(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
        }
    }

    fn not_found(&self) -> MediaError {
        match self {
            Tool::Ffmpeg => MediaError::FfmpegNotFound,
            Tool::Ffprobe => MediaError::FfprobeNotFound,
        }
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path (or `pipe:1`)
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Whether to emit `-progress pipe:2`
    progress: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            progress: true,
            log_level: "error".to_string(),
        }
    }

    /// Create a command that writes its output to stdout.
    pub fn to_stdout(input: impl AsRef<Path>) -> Self {
        Self::new(input, "pipe:1")
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Decode keyframes only.
    pub fn keyframes_only(self) -> Self {
        self.input_arg("-skip_frame").input_arg("nokey")
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set target video bitrate with a matching VBV buffer.
    pub fn video_bitrate_kbps(self, kbps: u32) -> Self {
        self.output_arg("-b:v")
            .output_arg(format!("{}k", kbps))
            .output_arg("-maxrate")
            .output_arg(format!("{}k", kbps + kbps / 2))
            .output_arg("-bufsize")
            .output_arg(format!("{}k", kbps * 2))
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Drop audio streams.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Drop video streams.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Force output format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// Disable `-progress pipe:2` output.
    pub fn without_progress(mut self) -> Self {
        self.progress = false;
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        if self.progress {
            args.push("-progress".to_string());
            args.push("pipe:2".to_string());
        }

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// How a supervised process ended.
enum Outcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Runner for FFmpeg/FFprobe with timeout, cancellation and a global
/// process cap.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Wall-clock timeout
    timeout: Option<Duration>,
    /// Global cap on concurrently running external processes
    limiter: Option<ProcessLimiter>,
    /// Label for logs and metrics
    operation: Option<String>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Share a process limiter.
    pub fn with_limiter(mut self, limiter: ProcessLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Set the operation label.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        self.supervise(Tool::Ffmpeg, cmd.build_args(), progress_callback, None::<fn(&[u8])>)
            .await
    }

    /// Run an FFmpeg command whose output goes to stdout, handing each chunk
    /// to `sink` as it arrives.
    pub async fn run_with_stdout<S>(&self, cmd: &FfmpegCommand, sink: S) -> MediaResult<()>
    where
        S: FnMut(&[u8]) + Send,
    {
        self.supervise(Tool::Ffmpeg, cmd.build_args(), |_| {}, Some(sink))
            .await
    }

    /// Run a tool with raw arguments and collect its stdout.
    pub async fn capture(&self, tool: Tool, args: Vec<String>) -> MediaResult<Vec<u8>> {
        let mut out = Vec::new();
        self.supervise(tool, args, |_| {}, Some(|chunk: &[u8]| out.extend_from_slice(chunk)))
            .await?;
        Ok(out)
    }

    async fn supervise<F, S>(
        &self,
        tool: Tool,
        args: Vec<String>,
        progress_callback: F,
        mut sink: Option<S>,
    ) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
        S: FnMut(&[u8]) + Send,
    {
        which::which(tool.binary()).map_err(|_| tool.not_found())?;

        let operation = self.operation.as_deref().unwrap_or(tool.binary()).to_string();
        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.acquire().await?),
            None => None,
        };

        debug!("Running {}: {} {}", operation, tool.binary(), args.join(" "));
        let started = Instant::now();

        let mut child = Command::new(tool.binary())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(if sink.is_some() { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let mut reader = BufReader::new(stderr).lines();

        // Progress parsing and stderr tail collection
        let stderr_handle = tokio::spawn(async move {
            let mut current_progress = FfmpegProgress::default();
            let mut tail = StderrTail::new(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = reader.next_line().await {
                if is_progress_line(&line) {
                    if let Some(progress) = parse_progress_line(&line, &mut current_progress) {
                        progress_callback(progress);
                    }
                } else {
                    tail.push(line);
                }
            }

            tail.into_string()
        });

        let mut stdout = child.stdout.take();
        let mut stdout_open = stdout.is_some();
        let mut buf = vec![0u8; 64 * 1024];
        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut cancel_rx = self.cancel_rx.clone();

        let outcome = loop {
            tokio::select! {
                read = read_chunk(&mut stdout, &mut buf), if stdout_open => {
                    match read? {
                        0 => stdout_open = false,
                        n => {
                            if let Some(sink) = sink.as_mut() {
                                sink(&buf[..n]);
                            }
                        }
                    }
                }
                status = child.wait(), if !stdout_open => break Outcome::Exited(status?),
                _ = sleep_until(deadline) => break Outcome::TimedOut,
                _ = wait_cancelled(&mut cancel_rx) => break Outcome::Cancelled,
            }
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            let _ = child.kill().await;
        }

        let stderr_tail = tokio::time::timeout(Duration::from_secs(5), stderr_handle)
            .await
            .ok()
            .and_then(|joined| joined.ok())
            .filter(|tail| !tail.is_empty());

        let elapsed = started.elapsed();
        metrics::histogram!("mflow_ffmpeg_duration_seconds", "operation" => operation.clone())
            .record(elapsed.as_secs_f64());

        match outcome {
            Outcome::Exited(status) if status.success() => {
                debug!("{} finished in {:.2}s", operation, elapsed.as_secs_f64());
                Ok(())
            }
            Outcome::Exited(status) => {
                warn!(
                    "{} exited with status {:?}: {}",
                    operation,
                    status.code(),
                    stderr_tail.as_deref().unwrap_or("<no stderr>")
                );
                match tool {
                    Tool::Ffmpeg => Err(MediaError::ffmpeg_failed(
                        "FFmpeg exited with non-zero status",
                        stderr_tail,
                        status.code(),
                    )),
                    Tool::Ffprobe => Err(MediaError::FfprobeFailed {
                        message: format!("FFprobe exited with status {:?}", status.code()),
                        stderr: stderr_tail,
                    }),
                }
            }
            Outcome::TimedOut => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("{} timed out after {} seconds, killed process", operation, secs);
                Err(MediaError::Timeout {
                    secs,
                    stderr: stderr_tail,
                })
            }
            Outcome::Cancelled => {
                info!("{} cancelled, killed process", operation);
                Err(MediaError::Cancelled)
            }
        }
    }
}

async fn read_chunk(stdout: &mut Option<ChildStdout>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stdout.as_mut() {
        Some(out) => out.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_cancelled(cancel_rx: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel_rx.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without cancelling
            return std::future::pending().await;
        }
    }
}

/// Bounded ring of the last stderr lines.
#[derive(Debug)]
struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        let line = line.trim_end().to_string();
        if line.is_empty() {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "stream_0_0_q",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Whether a stderr line belongs to `-progress` output.
fn is_progress_line(line: &str) -> bool {
    line.trim()
        .split_once('=')
        .map(|(key, _)| PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"))
        .unwrap_or(false)
}

/// Parse a progress line from FFmpeg's -progress output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = if key == "out_time_us" { us / 1000 } else { us };
                }
            }
            "out_time" => {
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                if value != "N/A" {
                    if let Some(speed_str) = value.strip_suffix('x') {
                        if let Ok(speed) = speed_str.trim().parse() {
                            current.speed = speed;
                        }
                    }
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .video_codec("libx264")
            .video_bitrate_kbps(2_500);

        let args = cmd.build_args();
        assert!(args.contains(&"-ss".to_string()));
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"2500k".to_string()));
        assert!(args.contains(&"5000k".to_string()));

        // Input args precede -i, output path is last
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i);
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_stdout_command() {
        let args = FfmpegCommand::to_stdout("in.wav")
            .without_progress()
            .format("f32le")
            .build_args();
        assert_eq!(args.last().unwrap(), "pipe:1");
        assert!(!args.contains(&"-progress".to_string()));
    }

    #[test]
    fn test_progress_parsing() {
        let mut progress = FfmpegProgress::default();

        parse_progress_line("out_time_ms=5000000", &mut progress);
        assert_eq!(progress.out_time_ms, 5000000);

        parse_progress_line("speed=1.5x", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let result = parse_progress_line("progress=end", &mut progress);
        assert!(result.is_some());
        assert!(progress.is_complete);
    }

    #[test]
    fn test_progress_lines_excluded_from_tail() {
        assert!(is_progress_line("out_time_us=1000"));
        assert!(is_progress_line("stream_0_0_q=28.0"));
        assert!(!is_progress_line("[h264 @ 0x55] error while decoding MB 10 4"));
        assert!(!is_progress_line("Conversion failed!"));
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let mut tail = StderrTail::new(3);
        for i in 0..10 {
            tail.push(format!("line {}", i));
        }
        tail.push("   ".to_string());
        assert_eq!(tail.into_string(), "line 7\nline 8\nline 9");
    }
}
