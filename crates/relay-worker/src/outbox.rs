//! Directory-backed messaging platform for running the pipeline locally.
//!
//! Uploads are copied into the outbox directory next to a JSON sidecar that
//! records the caption and upload hints. Status messages are logged.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_media::CancelToken;
use relay_models::{Attachment, ChatId, MediaKind, MessageRef, VideoMetadata};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::platform::{
    MessagingPlatform, PlatformError, PlatformResult, ResendRequest, UploadRequest,
};

const COPY_CHUNK: usize = 256 * 1024;

/// Sidecar written next to every delivered file.
#[derive(Debug, Serialize)]
pub struct OutboxRecord {
    pub message_id: i64,
    pub chat: ChatId,
    pub file_name: String,
    pub kind: MediaKind,
    pub caption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<PathBuf>,
    pub metadata: VideoMetadata,
    pub supports_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resent_file_id: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

pub struct LocalOutbox {
    dir: PathBuf,
    next_id: AtomicI64,
}

impl LocalOutbox {
    pub async fn new(dir: impl Into<PathBuf>) -> PlatformResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            next_id: AtomicI64::new(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_message(&self, chat: ChatId) -> MessageRef {
        MessageRef::new(chat, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn write_record(&self, name: &str, record: &OutboxRecord) -> PlatformResult<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| PlatformError::request(e.to_string()))?;
        tokio::fs::write(self.dir.join(format!("{}.json", name)), json).await?;
        Ok(())
    }
}

/// Chunked copy that stops when `cancel` fires, removing the partial copy.
async fn copy_with_cancel(src: &Path, dest: &Path, cancel: &CancelToken) -> PlatformResult<u64> {
    let mut reader = tokio::fs::File::open(src).await?;
    let mut writer = tokio::fs::File::create(dest).await?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;

    loop {
        if cancel.is_cancelled() {
            drop(writer);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(PlatformError::Stopped);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

#[async_trait]
impl MessagingPlatform for LocalOutbox {
    async fn send_text(&self, chat: ChatId, text: &str) -> PlatformResult<MessageRef> {
        let message = self.next_message(chat);
        info!(chat = %chat, message = message.message_id, "{}", text);
        Ok(message)
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> PlatformResult<()> {
        info!(chat = %message.chat, message = message.message_id, "{}", text);
        Ok(())
    }

    async fn delete_messages(&self, chat: ChatId, message_ids: &[i64]) -> PlatformResult<()> {
        debug!(chat = %chat, "Deleted messages {:?}", message_ids);
        Ok(())
    }

    /// Outbox attachments are local paths stored in `file_id`.
    async fn download_attachment(
        &self,
        attachment: &Attachment,
        dest: &Path,
        cancel: &CancelToken,
    ) -> PlatformResult<u64> {
        let src = Path::new(&attachment.file_id);
        if !src.exists() {
            return Err(PlatformError::MessageNotFound(attachment.message));
        }
        copy_with_cancel(src, dest, cancel).await
    }

    async fn upload(
        &self,
        request: &UploadRequest,
        cancel: &CancelToken,
    ) -> PlatformResult<MessageRef> {
        let dest = self.dir.join(&request.file_name);
        let bytes = copy_with_cancel(&request.path, &dest, cancel).await?;
        let message = self.next_message(request.chat);

        self.write_record(
            &request.file_name,
            &OutboxRecord {
                message_id: message.message_id,
                chat: request.chat,
                file_name: request.file_name.clone(),
                kind: request.kind,
                caption: request.caption.clone(),
                thumbnail: request.thumbnail.clone(),
                metadata: request.metadata,
                supports_streaming: request.supports_streaming,
                resent_file_id: None,
                delivered_at: Utc::now(),
            },
        )
        .await?;

        info!(
            file = %request.file_name,
            bytes = bytes,
            kind = request.kind.as_str(),
            "Delivered to outbox"
        );
        Ok(message)
    }

    async fn resend(&self, request: &ResendRequest) -> PlatformResult<MessageRef> {
        let message = self.next_message(request.chat);
        let kind = if request.as_video {
            MediaKind::Video
        } else {
            MediaKind::Document
        };
        self.write_record(
            &format!("resend_{}", message.message_id),
            &OutboxRecord {
                message_id: message.message_id,
                chat: request.chat,
                file_name: request.attachment.display_name(),
                kind,
                caption: request.caption.clone(),
                thumbnail: None,
                metadata: request.attachment.metadata,
                supports_streaming: request.as_video,
                resent_file_id: Some(request.attachment.file_id.clone()),
                delivered_at: Utc::now(),
            },
        )
        .await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn request(path: PathBuf) -> UploadRequest {
        UploadRequest {
            chat: ChatId(5),
            path,
            kind: MediaKind::Video,
            file_name: "Brand.mkv".to_string(),
            caption: "**Ep 01**".to_string(),
            thumbnail: None,
            metadata: VideoMetadata {
                duration: 30,
                width: 1280,
                height: 720,
            },
            supports_streaming: true,
        }
    }

    #[tokio::test]
    async fn test_upload_writes_file_and_sidecar() {
        let work = tempfile::tempdir().unwrap();
        let src = work.path().join("in.mkv");
        tokio::fs::write(&src, b"video-bytes").await.unwrap();

        let outbox = LocalOutbox::new(work.path().join("out")).await.unwrap();
        let message = assert_ok!(outbox.upload(&request(src), &CancelToken::new()).await);
        assert_eq!(message.chat, ChatId(5));

        let copied = tokio::fs::read(outbox.dir().join("Brand.mkv")).await.unwrap();
        assert_eq!(copied, b"video-bytes");

        let sidecar = tokio::fs::read_to_string(outbox.dir().join("Brand.mkv.json"))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(value["caption"], "**Ep 01**");
        assert_eq!(value["metadata"]["height"], 720);
    }

    #[tokio::test]
    async fn test_cancelled_upload_stops() {
        let work = tempfile::tempdir().unwrap();
        let src = work.path().join("in.mkv");
        tokio::fs::write(&src, b"video-bytes").await.unwrap();

        let outbox = LocalOutbox::new(work.path().join("out")).await.unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = assert_err!(outbox.upload(&request(src), &cancel).await);
        assert!(matches!(err, PlatformError::Stopped));
        assert!(!outbox.dir().join("Brand.mkv").exists());
    }
}
