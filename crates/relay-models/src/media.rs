//! Media descriptors: attachments, sources, tracks and probed metadata.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::MessageRef;
use crate::utils::extension_of;

/// Container extensions treated as video.
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi", ".mov", ".flv", ".wmv", ".webm"];

/// Container extensions treated as audio.
pub const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".m4a", ".flac", ".wav", ".aac"];

/// Coarse media classification driving the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    #[default]
    Document,
}

impl MediaKind {
    /// Classify by file extension, falling back to the kind declared by the platform.
    ///
    /// A declared video always wins, so a forwarded clip without an extension
    /// still goes through the video stages.
    pub fn classify(name: &str, declared: Option<MediaKind>) -> Self {
        if declared == Some(MediaKind::Video) {
            return MediaKind::Video;
        }
        let ext = extension_of(name);
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }
}

/// A file already hosted by the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Platform file handle
    pub file_id: String,
    /// Message carrying the attachment
    pub message: MessageRef,
    /// Declared file name, if the platform reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Declared kind
    pub kind: MediaKind,
    /// Declared size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Video hints carried by the platform
    #[serde(default)]
    pub metadata: VideoMetadata,
}

impl Attachment {
    /// Declared name or a synthetic one derived from the file handle.
    pub fn display_name(&self) -> String {
        match &self.file_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => {
                let ext = match self.kind {
                    MediaKind::Video => ".mp4",
                    MediaKind::Audio => ".mp3",
                    MediaKind::Document => "",
                };
                format!("file_{}{}", self.message.message_id, ext)
            }
        }
    }
}

/// One downloadable quality variant reported by the site extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Button label shown to the user
    pub label: String,
    /// Extractor format selector
    pub format: String,
    /// Whether the variant is converted to mp3
    #[serde(default)]
    pub audio_only: bool,
}

impl Variant {
    pub const BEST_FORMAT: &'static str = "bestvideo+bestaudio/best";
    pub const AUDIO_FORMAT: &'static str = "bestaudio/best";

    /// Best available video merged with best audio.
    pub fn best() -> Self {
        Self {
            label: "Best Quality".to_string(),
            format: Self::BEST_FORMAT.to_string(),
            audio_only: false,
        }
    }

    /// Audio only, converted to mp3.
    pub fn mp3() -> Self {
        Self {
            label: "MP3 (Audio Only)".to_string(),
            format: Self::AUDIO_FORMAT.to_string(),
            audio_only: true,
        }
    }

    /// A specific video format at a given height.
    pub fn video(format_id: &str, height: u32, ext: &str) -> Self {
        Self {
            label: format!("{}p | {}", height, ext),
            format: format_id.to_string(),
            audio_only: false,
        }
    }

    /// Format selector handed to the extractor for downloading.
    pub fn selector(&self) -> String {
        if self.audio_only || self.format == Self::BEST_FORMAT {
            self.format.clone()
        } else {
            format!("{}+bestaudio/best", self.format)
        }
    }
}

/// Where a job's media comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    /// A file already on local disk
    LocalFile { path: PathBuf },
    /// A platform-hosted attachment
    Attachment { attachment: Attachment },
    /// A plain HTTP or cloud-drive URL
    Url { url: String },
    /// A site URL resolved through the extractor
    Extracted {
        url: String,
        title: String,
        variant: Variant,
    },
}

impl MediaSource {
    pub fn describe(&self) -> String {
        match self {
            MediaSource::LocalFile { path } => format!("file {}", path.display()),
            MediaSource::Attachment { attachment } => {
                format!("attachment {}", attachment.display_name())
            }
            MediaSource::Url { url } => format!("url {}", url),
            MediaSource::Extracted { url, variant, .. } => {
                format!("url {} ({})", url, variant.label)
            }
        }
    }
}

/// An audio stream inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Stream index within the source container (not the 1-based UI index)
    pub stream_index: u32,
    /// Language tag, `und` when absent
    pub language: String,
    /// Track title, empty when absent
    pub title: String,
    /// Codec name when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

impl Track {
    /// Human-readable line used in the numbered prompt.
    pub fn describe(&self) -> String {
        if self.title.is_empty() {
            format!("Stream {} ({})", self.stream_index, self.language)
        } else {
            format!("Stream {} ({}) - {}", self.stream_index, self.language, self.title)
        }
    }
}

/// Upload hints for video attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VideoMetadata {
    /// Duration in whole seconds
    pub duration: u32,
    pub width: u32,
    pub height: u32,
}

impl VideoMetadata {
    pub fn is_empty(&self) -> bool {
        self.duration == 0 && self.width == 0 && self.height == 0
    }

    /// Dimensions are usable only when both are non-zero.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}
