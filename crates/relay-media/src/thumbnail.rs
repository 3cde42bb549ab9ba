//! Thumbnail generation.

use std::path::Path;

use crate::cancel::CancelToken;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Width of generated thumbnails; height keeps the aspect ratio.
pub const THUMBNAIL_SCALE_WIDTH: u32 = 320;

/// Extract a single frame at `offset_secs` as a still image.
///
/// Succeeds only when the image exists and is non-empty.
pub async fn generate_thumbnail(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    offset_secs: u64,
    timeout_secs: u64,
    cancel: &CancelToken,
) -> MediaResult<()> {
    let video_path = video_path.as_ref();
    let output_path = output_path.as_ref();

    let cmd = thumbnail_command(video_path, output_path, offset_secs);

    FfmpegRunner::new()
        .with_cancel(cancel.clone())
        .with_timeout(timeout_secs)
        .run(&cmd)
        .await?;

    match tokio::fs::metadata(output_path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(MediaError::ffmpeg_failed(
            "thumbnail was not written",
            None,
            None,
        )),
    }
}

fn thumbnail_command(video_path: &Path, output_path: &Path, offset_secs: u64) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .seek(offset_secs as f64)
        .single_frame()
        .video_filter(format!("scale={}:-1", THUMBNAIL_SCALE_WIDTH))
        .log_level("error")
}
