//! FFprobe and mediainfo metadata extraction.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use relay_models::{Track, VideoMetadata};

use crate::command::{check_ffprobe, check_mediainfo, run_tool, stderr_tail};
use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: Option<u32>,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl FfprobeStream {
    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }

    fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .or_else(|| self.tags.get(&key.to_ascii_uppercase()))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// mediainfo `--Output=JSON` format.
#[derive(Debug, Deserialize)]
struct MediaInfoOutput {
    media: Option<MediaInfoMedia>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoMedia {
    #[serde(default)]
    track: Vec<MediaInfoTrack>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoTrack {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "Duration")]
    duration: Option<String>,
    #[serde(rename = "Width")]
    width: Option<String>,
    #[serde(rename = "Height")]
    height: Option<String>,
}

/// Result of probing with fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub metadata: VideoMetadata,
    /// The primary probe failed or returned incomplete data
    pub degraded: bool,
}

async fn ffprobe_json(path: &Path, timeout_secs: u64) -> MediaResult<FfprobeOutput> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let args = vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        path.to_string_lossy().to_string(),
    ];

    let output = run_tool("ffprobe", &args, Some(timeout_secs), None).await?;

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            "FFprobe failed",
            Some(stderr_tail(&output.stderr)),
        ));
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

fn parse_seconds(value: Option<&str>) -> Option<u32> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u32)
}

fn parse_dimension(value: Option<&str>) -> u32 {
    value
        .map(|v| v.chars().filter(char::is_ascii_digit).collect::<String>())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

fn metadata_from_ffprobe(probe: &FfprobeOutput) -> VideoMetadata {
    let video = probe.streams.iter().find(|s| s.is("video"));

    let duration = parse_seconds(probe.format.duration.as_deref())
        .or_else(|| video.and_then(|v| parse_seconds(v.duration.as_deref())))
        .unwrap_or(0);

    VideoMetadata {
        duration,
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
    }
}

fn metadata_from_mediainfo(info: &MediaInfoOutput) -> VideoMetadata {
    let tracks = info
        .media
        .as_ref()
        .map(|m| m.track.as_slice())
        .unwrap_or_default();
    let general = tracks.iter().find(|t| t.kind == "General");
    let video = tracks.iter().find(|t| t.kind == "Video");

    let duration = general
        .and_then(|t| parse_seconds(t.duration.as_deref()))
        .or_else(|| video.and_then(|t| parse_seconds(t.duration.as_deref())))
        .unwrap_or(0);

    VideoMetadata {
        duration,
        width: parse_dimension(video.and_then(|t| t.width.as_deref())),
        height: parse_dimension(video.and_then(|t| t.height.as_deref())),
    }
}

fn tracks_from_ffprobe(probe: &FfprobeOutput) -> Vec<Track> {
    probe
        .streams
        .iter()
        .filter(|s| s.is("audio"))
        .enumerate()
        .map(|(position, s)| Track {
            stream_index: s.index.unwrap_or(position as u32),
            language: s.tag("language").unwrap_or("und").to_string(),
            title: s.tag("title").unwrap_or_default().to_string(),
            codec: s.codec_name.clone(),
        })
        .collect()
}

/// Duration and dimensions from ffprobe.
pub async fn probe_metadata(path: impl AsRef<Path>, timeout_secs: u64) -> MediaResult<VideoMetadata> {
    let probe = ffprobe_json(path.as_ref(), timeout_secs).await?;
    Ok(metadata_from_ffprobe(&probe))
}

/// Duration and dimensions from mediainfo.
pub async fn mediainfo_metadata(
    path: impl AsRef<Path>,
    timeout_secs: u64,
) -> MediaResult<VideoMetadata> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    check_mediainfo()?;

    let args = vec![
        "--Output=JSON".to_string(),
        path.to_string_lossy().to_string(),
    ];
    let output = run_tool("mediainfo", &args, Some(timeout_secs), None).await?;
    if !output.status.success() {
        return Err(MediaError::InvalidVideo(format!(
            "mediainfo failed: {}",
            stderr_tail(&output.stderr)
        )));
    }

    let info: MediaInfoOutput = serde_json::from_slice(&output.stdout)?;
    Ok(metadata_from_mediainfo(&info))
}

/// Probe with ffprobe, filling gaps from mediainfo. Never fails.
///
/// Fields the primary probe could not determine are taken from the
/// secondary extractor; anything still unknown stays zero.
pub async fn probe_with_fallback(path: impl AsRef<Path>, timeout_secs: u64) -> ProbeReport {
    let path = path.as_ref();

    let primary = match probe_metadata(path, timeout_secs).await {
        Ok(metadata) if metadata.has_dimensions() => {
            return ProbeReport {
                metadata,
                degraded: false,
            }
        }
        Ok(metadata) => {
            warn!(path = %path.display(), "FFprobe returned zero dimensions, trying mediainfo");
            metadata
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "FFprobe failed, trying mediainfo");
            VideoMetadata::default()
        }
    };

    let merged = match mediainfo_metadata(path, timeout_secs).await {
        Ok(secondary) => merge_metadata(primary, secondary),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mediainfo fallback failed");
            primary
        }
    };

    debug!(
        path = %path.display(),
        duration = merged.duration,
        width = merged.width,
        height = merged.height,
        "Probe finished with fallback"
    );

    ProbeReport {
        metadata: merged,
        degraded: true,
    }
}

fn merge_metadata(primary: VideoMetadata, secondary: VideoMetadata) -> VideoMetadata {
    VideoMetadata {
        duration: if primary.duration == 0 {
            secondary.duration
        } else {
            primary.duration
        },
        width: if primary.width == 0 {
            secondary.width
        } else {
            primary.width
        },
        height: if primary.height == 0 {
            secondary.height
        } else {
            primary.height
        },
    }
}

/// Enumerate audio streams in container order.
pub async fn list_audio_tracks(path: impl AsRef<Path>, timeout_secs: u64) -> MediaResult<Vec<Track>> {
    let probe = ffprobe_json(path.as_ref(), timeout_secs).await?;
    Ok(tracks_from_ffprobe(&probe))
}

/// Lower-cased codec names of every audio stream.
pub async fn audio_codecs(path: impl AsRef<Path>, timeout_secs: u64) -> MediaResult<Vec<String>> {
    let tracks = list_audio_tracks(path, timeout_secs).await?;
    Ok(tracks
        .into_iter()
        .filter_map(|t| t.codec.map(|c| c.to_ascii_lowercase()))
        .collect())
}
