//! Messaging platform seam.
//!
//! The pipeline talks to the chat service only through [`MessagingPlatform`],
//! so the transport (bot API client, local outbox, test fake) is swappable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay_media::CancelToken;
use relay_models::{Attachment, ChatId, MediaKind, MessageRef, VideoMetadata};
use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// A transfer was stopped because its cancel token fired.
    #[error("Transfer stopped")]
    Stopped,

    #[error("Message not found: {0}")]
    MessageNotFound(MessageRef),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }
}

/// A finished file ready to be posted.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub chat: ChatId,
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Name shown to recipients
    pub file_name: String,
    pub caption: String,
    pub thumbnail: Option<PathBuf>,
    pub metadata: VideoMetadata,
    pub supports_streaming: bool,
}

impl UploadRequest {
    /// Whether the platform should present this as a playable video.
    pub fn as_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// Re-post of an existing attachment with a new caption, no transfer.
#[derive(Debug, Clone)]
pub struct ResendRequest {
    pub chat: ChatId,
    pub attachment: Attachment,
    pub caption: String,
    pub as_video: bool,
}

#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> PlatformResult<MessageRef>;

    async fn edit_text(&self, message: &MessageRef, text: &str) -> PlatformResult<()>;

    async fn delete_messages(&self, chat: ChatId, message_ids: &[i64]) -> PlatformResult<()>;

    /// Fetch an attachment's bytes to `dest`, returning the size written.
    async fn download_attachment(
        &self,
        attachment: &Attachment,
        dest: &Path,
        cancel: &CancelToken,
    ) -> PlatformResult<u64>;

    /// Post a file. Implementations must poll `cancel` while sending and
    /// return [`PlatformError::Stopped`] once it fires.
    async fn upload(
        &self,
        request: &UploadRequest,
        cancel: &CancelToken,
    ) -> PlatformResult<MessageRef>;

    async fn resend(&self, request: &ResendRequest) -> PlatformResult<MessageRef>;
}
