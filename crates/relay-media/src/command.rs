//! FFmpeg command builder and external tool runner.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{MediaError, MediaResult};

/// Maximum number of stderr bytes kept in error values.
const STDERR_TAIL_BYTES: usize = 2000;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
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
            log_level: "error".to_string(),
        }
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

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Select an input stream (`-map`).
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Copy every selected stream without re-encoding.
    pub fn copy_codecs(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set a container-level metadata tag. An empty value clears it.
    pub fn metadata(self, key: &str, value: &str) -> Self {
        self.output_arg("-metadata")
            .output_arg(format!("{}={}", key, value))
    }

    /// Set a per-stream metadata tag, e.g. `stream_metadata("a", "title", "x")`.
    pub fn stream_metadata(self, stream: &str, key: &str, value: &str) -> Self {
        self.output_arg(format!("-metadata:s:{}", stream))
            .output_arg(format!("{}={}", key, value))
    }

    /// Set stream disposition, e.g. `disposition("a:0", "default")`.
    pub fn disposition(self, stream: &str, value: &str) -> Self {
        self.output_arg(format!("-disposition:{}", stream))
            .output_arg(value)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with cancellation and timeout.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    /// Cancellation token
    cancel: Option<CancelToken>,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command. Non-zero exit is an error.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let output = run_tool("ffmpeg", &args, self.timeout_secs, self.cancel.as_ref()).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr_tail(&output.stderr)),
                output.status.code(),
            ))
        }
    }
}

/// Run an external tool to completion, capturing its output.
///
/// The child is killed when the timeout fires or the token is cancelled.
/// A non-zero exit status is returned as-is for the caller to judge.
pub async fn run_tool(
    program: &str,
    args: &[String],
    timeout_secs: Option<u64>,
    cancel: Option<&CancelToken>,
) -> MediaResult<Output> {
    if let Some(token) = cancel {
        token.check()?;
    }

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let wait = async move {
        let wait_future = child.wait_with_output();
        match timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), wait_future).await
            {
                Ok(result) => result.map_err(MediaError::from),
                Err(_) => {
                    warn!(program, timeout_secs = secs, "Tool timed out, killing process");
                    Err(MediaError::Timeout(secs))
                }
            },
            None => wait_future.await.map_err(MediaError::from),
        }
    };

    tokio::select! {
        biased;
        _ = wait_for_cancel(cancel) => {
            info!(program, "Tool cancelled, killing process");
            Err(MediaError::Cancelled)
        }
        result = wait => result,
    }
}

async fn wait_for_cancel(cancel: Option<&CancelToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

/// Last part of a tool's stderr, for error messages.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Check if mediainfo is available.
pub fn check_mediainfo() -> MediaResult<PathBuf> {
    which::which("mediainfo").map_err(|_| MediaError::MediaInfoNotFound)
}

/// Check if yt-dlp is available.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}
