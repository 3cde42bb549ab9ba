//! Stream-copy remuxing: container normalization and audio reordering.

use std::path::Path;
use tracing::{info, warn};

use relay_models::extension_of;

use crate::cancel::CancelToken;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Audio codecs that cannot be stream-copied into an mp4 container.
pub const MP4_INCOMPATIBLE_AUDIO: &[&str] = &["opus", "vorbis", "truehd"];

/// Output container for a video upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Mkv,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => ".mp4",
            Container::Mkv => ".mkv",
        }
    }
}

/// Pick the output container from the source name and its audio codecs.
///
/// mp4 stays mp4 unless it carries an audio codec mp4 cannot hold; every
/// other container becomes mkv.
pub fn target_container(source_name: &str, audio_codecs: &[String]) -> Container {
    match extension_of(source_name).as_str() {
        ".mp4" => {
            let incompatible = audio_codecs
                .iter()
                .any(|c| MP4_INCOMPATIBLE_AUDIO.contains(&c.to_ascii_lowercase().as_str()));
            if incompatible {
                Container::Mkv
            } else {
                Container::Mp4
            }
        }
        _ => Container::Mkv,
    }
}

/// Explicit stream selection for an audio reorder.
///
/// Keeps every video, subtitle and data stream, then the chosen audio
/// streams in the given order. The first audio stream becomes the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMap {
    audio: Vec<u32>,
}

impl StreamMap {
    /// Build from source-container stream indices. At least one is required.
    pub fn new(audio_stream_indices: Vec<u32>) -> MediaResult<Self> {
        if audio_stream_indices.is_empty() {
            return Err(MediaError::internal("stream map needs at least one audio stream"));
        }
        Ok(Self {
            audio: audio_stream_indices,
        })
    }

    pub fn audio_streams(&self) -> &[u32] {
        &self.audio
    }

    /// `-map` specifiers in output order.
    pub fn map_specs(&self) -> Vec<String> {
        let mut specs = vec!["0:v".to_string(), "0:s?".to_string(), "0:d?".to_string()];
        specs.extend(self.audio.iter().map(|idx| format!("0:{}", idx)));
        specs
    }

    fn apply(&self, mut cmd: FfmpegCommand) -> FfmpegCommand {
        for spec in self.map_specs() {
            cmd = cmd.map(spec);
        }
        cmd.disposition("a", "0").disposition("a:0", "default")
    }
}

/// Copy-only remux that retitles audio tracks and clears the handler name.
///
/// Callers treat a failure as soft and upload the original file instead.
pub async fn normalize(
    input: &Path,
    output: &Path,
    audio_title: &str,
    timeout_secs: u64,
    cancel: &CancelToken,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(input, output)
        .map("0")
        .copy_codecs()
        .stream_metadata("a", "title", audio_title)
        .metadata("handler_name", "");

    run_and_verify(&cmd, timeout_secs, cancel).await?;
    info!(
        input = %input.display(),
        output = %output.display(),
        "Normalized container"
    );
    Ok(())
}

/// Remux keeping only the mapped audio streams in the given order.
///
/// Fails on non-zero exit or an absent/empty output file.
pub async fn reorder_audio(
    input: &Path,
    output: &Path,
    map: &StreamMap,
    audio_title: &str,
    timeout_secs: u64,
    cancel: &CancelToken,
) -> MediaResult<()> {
    let cmd = map
        .apply(FfmpegCommand::new(input, output))
        .stream_metadata("a", "title", audio_title)
        .copy_codecs()
        .metadata("handler_name", "");

    run_and_verify(&cmd, timeout_secs, cancel).await?;
    info!(
        input = %input.display(),
        output = %output.display(),
        audio_streams = ?map.audio_streams(),
        "Reordered audio tracks"
    );
    Ok(())
}

async fn run_and_verify(cmd: &FfmpegCommand, timeout_secs: u64, cancel: &CancelToken) -> MediaResult<()> {
    let output = cmd.output_path();
    let result = FfmpegRunner::new()
        .with_cancel(cancel.clone())
        .with_timeout(timeout_secs)
        .run(cmd)
        .await;

    match result {
        Ok(()) => verify_output(output).await,
        Err(MediaError::FfmpegFailed {
            message, stderr, ..
        }) => {
            discard(output).await;
            Err(MediaError::remux_failed(message, stderr))
        }
        Err(e) => {
            discard(output).await;
            Err(e)
        }
    }
}

/// Require the remux output to exist and be non-empty.
pub async fn verify_output(output: &Path) -> MediaResult<()> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => {
            discard(output).await;
            Err(MediaError::remux_failed("remux produced an empty file", None))
        }
        Err(_) => Err(MediaError::remux_failed("remux produced no output file", None)),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove remux output");
        }
    }
}
