//! Video-site extraction using yt-dlp.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use relay_models::Variant;

use crate::cancel::CancelToken;
use crate::command::{check_ytdlp, run_tool, stderr_tail};
use crate::error::{MediaError, MediaResult};

#[derive(Debug, Deserialize)]
struct YtInfo {
    title: Option<String>,
    #[serde(default)]
    formats: Vec<YtFormat>,
}

#[derive(Debug, Deserialize)]
struct YtFormat {
    format_id: String,
    ext: Option<String>,
    height: Option<u32>,
    vcodec: Option<String>,
}

/// Title and selectable variants for a site URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedInfo {
    pub title: String,
    pub variants: Vec<Variant>,
}

/// Build the variant list: best, one entry per distinct height (tallest
/// first), then audio-only mp3.
fn variants_from_info(info: &YtInfo) -> Vec<Variant> {
    let mut video: Vec<&YtFormat> = info
        .formats
        .iter()
        .filter(|f| f.vcodec.as_deref() != Some("none") || f.height.is_some())
        .collect();
    video.sort_by(|a, b| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)));

    let mut seen = HashSet::new();
    let mut variants = vec![Variant::best()];
    for format in video {
        let Some(height) = format.height.filter(|h| *h > 0) else {
            continue;
        };
        if !seen.insert(height) {
            continue;
        }
        variants.push(Variant::video(
            &format.format_id,
            height,
            format.ext.as_deref().unwrap_or("mp4"),
        ));
    }
    variants.push(Variant::mp3());
    variants
}

/// yt-dlp wrapper bounded by a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct Extractor {
    timeout_secs: u64,
}

impl Extractor {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    /// Whether yt-dlp is installed.
    pub fn is_available(&self) -> bool {
        check_ytdlp().is_ok()
    }

    /// Query title and quality variants without downloading.
    pub async fn list_variants(&self, url: &str, cancel: &CancelToken) -> MediaResult<ExtractedInfo> {
        check_ytdlp()?;

        let args = vec![
            "-J".to_string(),
            "--no-playlist".to_string(),
            url.to_string(),
        ];
        let output = run_tool("yt-dlp", &args, Some(self.timeout_secs), Some(cancel)).await?;
        if !output.status.success() {
            return Err(MediaError::download_failed(format!(
                "URL extract error: {}",
                stderr_tail(&output.stderr)
            )));
        }

        let info: YtInfo = serde_json::from_slice(&output.stdout)?;
        let variants = variants_from_info(&info);
        debug!(url = %url, variants = variants.len(), "Extracted variants");

        Ok(ExtractedInfo {
            title: info.title.unwrap_or_else(|| "video".to_string()),
            variants,
        })
    }

    /// Download a variant into `dir`, naming the file `<stem>.<ext>`.
    ///
    /// Video variants are merged into mkv; audio-only variants become mp3.
    pub async fn download(
        &self,
        url: &str,
        variant: &Variant,
        dir: &Path,
        stem: &str,
        cancel: &CancelToken,
    ) -> MediaResult<PathBuf> {
        check_ytdlp()?;

        let template = dir.join(format!("{}.%(ext)s", stem));
        let args = download_args(url, variant, &template);

        info!(url = %url, format = %variant.selector(), "Downloading variant");
        let output = run_tool("yt-dlp", &args, Some(self.timeout_secs), Some(cancel)).await?;
        if !output.status.success() {
            return Err(MediaError::download_failed(stderr_tail(&output.stderr)));
        }

        find_with_prefix(dir, stem)
            .await?
            .ok_or_else(|| MediaError::download_failed("downloaded file not found"))
    }
}

fn download_args(url: &str, variant: &Variant, template: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--no-playlist".into(),
        "--quiet".into(),
        "-f".into(),
        variant.selector(),
        "-o".into(),
        template.to_string_lossy().to_string(),
    ];
    if variant.audio_only {
        args.extend(
            ["-x", "--audio-format", "mp3", "--audio-quality", "192K"]
                .iter()
                .map(|s| s.to_string()),
        );
    } else {
        args.extend(["--merge-output-format", "mkv"].iter().map(|s| s.to_string()));
    }
    args.push(url.to_string());
    args
}

async fn find_with_prefix(dir: &Path, prefix: &str) -> MediaResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && !name.ends_with(".part") {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}
