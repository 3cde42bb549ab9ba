//! Shared data models for the media relay.
//!
//! This crate provides Serde-serializable types for:
//! - User, chat, message and job identifiers
//! - Attachments, media sources and media kinds
//! - Probed audio tracks and video metadata
//! - File naming helpers shared by the pipeline

pub mod ids;
pub mod media;
pub mod utils;

// Re-export common types
pub use ids::{ChatId, JobId, MessageRef, UserId};
pub use media::{Attachment, MediaKind, MediaSource, Track, Variant, VideoMetadata};
pub use utils::{
    branded_filename, extension_of, filename_from_url, format_size, parse_time, sanitize_filename,
    stem_of, TimeParseError,
};
