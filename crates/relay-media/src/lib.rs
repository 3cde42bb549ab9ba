//! FFmpeg, probe and download wrappers for the media relay.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Cancellation and timeouts for every external tool
//! - ffprobe metadata with a mediainfo fallback
//! - Stream-copy remuxing (container normalization, audio reordering)
//! - Thumbnail extraction
//! - Streaming HTTP and cloud-drive downloads, and yt-dlp extraction

pub mod cancel;
pub mod command;
pub mod download;
pub mod error;
pub mod extractor;
pub mod probe;
pub mod remux;
pub mod thumbnail;
pub mod tools;

pub use cancel::CancelToken;
pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use download::{extract_drive_id, is_drive_url, HttpDownloader, DEFAULT_MAX_BYTES};
pub use error::{MediaError, MediaResult};
pub use extractor::{ExtractedInfo, Extractor};
pub use probe::ProbeReport;
pub use remux::{target_container, Container, StreamMap};
pub use thumbnail::generate_thumbnail;
pub use tools::{MediaTools, RemoteFetch, SystemTools, ToolTimeouts, WebFetcher};
