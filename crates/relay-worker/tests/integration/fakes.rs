//! In-memory collaborators and a harness wiring them into a [`Relay`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use relay_media::{
    CancelToken, ExtractedInfo, MediaError, MediaResult, MediaTools, ProbeReport, RemoteFetch,
    StreamMap,
};
use relay_models::{
    Attachment, ChatId, MediaKind, MessageRef, Track, UserId, Variant, VideoMetadata,
};
use relay_worker::channels::ChannelStore;
use relay_worker::{
    MessagingPlatform, PlatformError, PlatformResult, Relay, RelayConfig, ResendRequest,
    UploadRequest,
};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const BRAND: &str = "[@TA_HD_Anime] Telegram Channel";

/// One successful upload as seen by the platform.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub chat: ChatId,
    pub file_name: String,
    pub caption: String,
    pub kind: MediaKind,
    pub metadata: VideoMetadata,
    pub thumbnail: Option<PathBuf>,
    pub content: Vec<u8>,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
pub struct FakePlatform {
    next_id: AtomicI64,
    sent: Mutex<Vec<(MessageRef, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    deleted: Mutex<Vec<i64>>,
    resends: Mutex<Vec<ResendRequest>>,
    uploads: Mutex<Vec<UploadRecord>>,
    upload_attempts: AtomicU32,
    failures_left: AtomicU32,
    upload_delay: Duration,
    hold_downloads: AtomicBool,
    pub download_started: Notify,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// The next `n` upload attempts fail with a transient error.
    pub fn failing_uploads(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Downloads write their bytes and then block until cancelled.
    pub fn holding_downloads(self) -> Self {
        self.hold_downloads.store(true, Ordering::SeqCst);
        self
    }

    pub fn sent(&self) -> Vec<(MessageRef, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }

    /// First sent message starting with `prefix`.
    pub fn find_sent(&self, prefix: &str) -> Option<MessageRef> {
        self.sent()
            .into_iter()
            .find(|(_, text)| text.starts_with(prefix))
            .map(|(message, _)| message)
    }

    pub fn last_edit(&self, message: MessageRef) -> Option<String> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| *m == message)
            .map(|(_, text)| text.clone())
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn resends(&self) -> Vec<ResendRequest> {
        self.resends.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn upload_attempts(&self) -> u32 {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    fn next_message(&self, chat: ChatId) -> MessageRef {
        MessageRef::new(chat, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl MessagingPlatform for FakePlatform {
    async fn send_text(&self, chat: ChatId, text: &str) -> PlatformResult<MessageRef> {
        let message = self.next_message(chat);
        self.sent.lock().unwrap().push((message, text.to_string()));
        Ok(message)
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> PlatformResult<()> {
        self.edits.lock().unwrap().push((*message, text.to_string()));
        Ok(())
    }

    async fn delete_messages(&self, _chat: ChatId, message_ids: &[i64]) -> PlatformResult<()> {
        self.deleted.lock().unwrap().extend_from_slice(message_ids);
        Ok(())
    }

    /// Writes the attachment's `file_id` as the file content.
    async fn download_attachment(
        &self,
        attachment: &Attachment,
        dest: &Path,
        cancel: &CancelToken,
    ) -> PlatformResult<u64> {
        tokio::fs::write(dest, attachment.file_id.as_bytes()).await?;
        self.download_started.notify_one();
        if self.hold_downloads.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err(PlatformError::Stopped);
        }
        Ok(attachment.file_id.len() as u64)
    }

    async fn upload(
        &self,
        request: &UploadRequest,
        cancel: &CancelToken,
    ) -> PlatformResult<MessageRef> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        tokio::select! {
            _ = cancel.cancelled() => return Err(PlatformError::Stopped),
            _ = tokio::time::sleep(self.upload_delay) => {}
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PlatformError::request("connection reset"));
        }

        let content = tokio::fs::read(&request.path).await?;
        self.uploads.lock().unwrap().push(UploadRecord {
            chat: request.chat,
            file_name: request.file_name.clone(),
            caption: request.caption.clone(),
            kind: request.kind,
            metadata: request.metadata,
            thumbnail: request.thumbnail.clone(),
            content,
            started,
            finished: Instant::now(),
        });
        Ok(self.next_message(request.chat))
    }

    async fn resend(&self, request: &ResendRequest) -> PlatformResult<MessageRef> {
        self.resends.lock().unwrap().push(request.clone());
        Ok(self.next_message(request.chat))
    }
}

/// Media tools that copy files instead of running ffmpeg.
///
/// Normalized output is the input followed by `|norm`. Inputs whose path
/// contains `slow` take noticeably longer to normalize.
#[derive(Default)]
pub struct FakeTools {
    tracks: Mutex<Vec<Track>>,
    codecs: Mutex<Vec<String>>,
    fail_normalize: AtomicBool,
    panic_normalize: AtomicBool,
    fail_reorder: AtomicBool,
    reorders: Mutex<Vec<Vec<u32>>>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            codecs: Mutex::new(vec!["aac".to_string()]),
            ..Self::default()
        }
    }

    pub fn with_tracks(self, tracks: Vec<Track>) -> Self {
        *self.tracks.lock().unwrap() = tracks;
        self
    }

    pub fn with_codecs(self, codecs: &[&str]) -> Self {
        *self.codecs.lock().unwrap() = codecs.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn failing_normalize(self) -> Self {
        self.fail_normalize.store(true, Ordering::SeqCst);
        self
    }

    /// Normalization panics instead of returning.
    pub fn panicking_normalize(self) -> Self {
        self.panic_normalize.store(true, Ordering::SeqCst);
        self
    }

    /// Every audio reorder fails without writing output.
    pub fn failing_reorder(self) -> Self {
        self.fail_reorder.store(true, Ordering::SeqCst);
        self
    }

    /// Audio stream indices of every reorder, in call order.
    pub fn reorders(&self) -> Vec<Vec<u32>> {
        self.reorders.lock().unwrap().clone()
    }
}

pub fn track(stream_index: u32, language: &str, title: &str) -> Track {
    Track {
        stream_index,
        language: language.to_string(),
        title: title.to_string(),
        codec: Some("aac".to_string()),
    }
}

#[async_trait]
impl MediaTools for FakeTools {
    async fn probe(&self, _path: &Path) -> ProbeReport {
        ProbeReport {
            metadata: VideoMetadata {
                duration: 42,
                width: 1920,
                height: 1080,
            },
            degraded: false,
        }
    }

    async fn audio_tracks(&self, _path: &Path) -> MediaResult<Vec<Track>> {
        Ok(self.tracks.lock().unwrap().clone())
    }

    async fn audio_codecs(&self, _path: &Path) -> MediaResult<Vec<String>> {
        Ok(self.codecs.lock().unwrap().clone())
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        _audio_title: &str,
        cancel: &CancelToken,
    ) -> MediaResult<()> {
        if input.to_string_lossy().contains("slow") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        cancel.check()?;
        if self.panic_normalize.load(Ordering::SeqCst) {
            panic!("normalize blew up");
        }
        if self.fail_normalize.load(Ordering::SeqCst) {
            return Err(MediaError::remux_failed("unsupported stream", None));
        }
        let mut content = tokio::fs::read(input).await?;
        content.extend_from_slice(b"|norm");
        tokio::fs::write(output, content).await?;
        Ok(())
    }

    async fn reorder_audio(
        &self,
        input: &Path,
        output: &Path,
        map: &StreamMap,
        _audio_title: &str,
        cancel: &CancelToken,
    ) -> MediaResult<()> {
        cancel.check()?;
        self.reorders
            .lock()
            .unwrap()
            .push(map.audio_streams().to_vec());
        if self.fail_reorder.load(Ordering::SeqCst) {
            return Err(MediaError::remux_failed("audio map rejected", None));
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn thumbnail(
        &self,
        _video: &Path,
        output: &Path,
        _offset_secs: u64,
        cancel: &CancelToken,
    ) -> MediaResult<()> {
        cancel.check()?;
        tokio::fs::write(output, b"jpeg").await?;
        Ok(())
    }
}

/// Remote fetch serving fixed bytes; the extractor is off unless given
/// variants.
#[derive(Default)]
pub struct FakeFetch {
    extracted: Option<ExtractedInfo>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extractor(title: &str, variants: Vec<Variant>) -> Self {
        Self {
            extracted: Some(ExtractedInfo {
                title: title.to_string(),
                variants,
            }),
            ..Self::default()
        }
    }

    /// URLs and drive ids fetched so far.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteFetch for FakeFetch {
    async fn fetch_url(&self, url: &str, dest: &Path, cancel: &CancelToken) -> MediaResult<u64> {
        cancel.check()?;
        self.fetched.lock().unwrap().push(url.to_string());
        tokio::fs::write(dest, b"remote").await?;
        Ok(6)
    }

    async fn fetch_drive(&self, file_id: &str, dest: &Path, cancel: &CancelToken) -> MediaResult<u64> {
        cancel.check()?;
        self.fetched.lock().unwrap().push(format!("drive:{}", file_id));
        tokio::fs::write(dest, b"drive").await?;
        Ok(5)
    }

    async fn list_variants(&self, _url: &str, _cancel: &CancelToken) -> MediaResult<ExtractedInfo> {
        self.extracted
            .clone()
            .ok_or_else(|| MediaError::download_failed("unsupported URL"))
    }

    async fn download_variant(
        &self,
        url: &str,
        variant: &Variant,
        dir: &Path,
        stem: &str,
        cancel: &CancelToken,
    ) -> MediaResult<PathBuf> {
        cancel.check()?;
        self.fetched.lock().unwrap().push(format!("{} [{}]", url, variant.label));
        let ext = if variant.audio_only { "mp3" } else { "mkv" };
        let path = dir.join(format!("{}.{}", stem, ext));
        tokio::fs::write(&path, b"extracted").await?;
        Ok(path)
    }

    fn extractor_available(&self) -> bool {
        self.extracted.is_some()
    }
}

/// A relay wired to fakes inside a scratch directory.
pub struct Harness {
    pub dir: TempDir,
    pub platform: Arc<FakePlatform>,
    pub tools: Arc<FakeTools>,
    pub fetch: Arc<FakeFetch>,
    pub relay: Relay,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(FakePlatform::new(), FakeTools::new(), FakeFetch::new()).await
    }

    pub async fn with(platform: FakePlatform, tools: FakeTools, fetch: FakeFetch) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        tokio::fs::create_dir_all(&work).await.unwrap();

        let config = RelayConfig::for_work_dir(&work);
        let channels = ChannelStore::load(&config.channels_file).await;
        let platform = Arc::new(platform);
        let tools = Arc::new(tools);
        let fetch = Arc::new(fetch);
        let relay = Relay::new(
            Arc::new(config),
            platform.clone(),
            tools.clone(),
            fetch.clone(),
            channels,
        );

        Self {
            dir,
            platform,
            tools,
            fetch,
            relay,
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// Regular files left directly in the work directory.
    pub fn work_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.work_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect()
    }

    /// Write an input file outside the work directory.
    pub async fn input_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let dir = self.dir.path().join("in");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }
}

pub fn user(id: i64) -> (UserId, ChatId) {
    (UserId(id), ChatId(id))
}

/// Video attachment whose downloaded content is `content`.
pub fn attachment(chat: ChatId, message_id: i64, name: &str, content: &str) -> Attachment {
    Attachment {
        file_id: content.to_string(),
        message: MessageRef::new(chat, message_id),
        file_name: Some(name.to_string()),
        kind: MediaKind::Video,
        size: Some(content.len() as u64),
        metadata: VideoMetadata::default(),
    }
}

pub fn branded(ext: &str) -> String {
    format!("{}{}", BRAND, ext)
}
