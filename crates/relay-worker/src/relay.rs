//! Front door of the relay: routes user actions to the queue, the audio
//! reorder protocol, caption-only resends and per-user settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use relay_media::{extract_drive_id, is_drive_url, MediaTools, RemoteFetch};
use relay_models::{
    extension_of, filename_from_url, parse_time, sanitize_filename, Attachment, ChatId, JobId,
    MediaKind, MediaSource, MessageRef, UserId, Variant,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio_order::{AudioReorderProtocol, ProbeOutcome, ReplyOutcome};
use crate::batch::BatchCollector;
use crate::channels::ChannelStore;
use crate::config::RelayConfig;
use crate::error::WorkerResult;
use crate::handler::PipelineHandler;
use crate::job::{Job, JobOutcome, Naming};
use crate::pipeline::MediaPipeline;
use crate::platform::{MessagingPlatform, ResendRequest};
use crate::queue::JobQueue;
use crate::settings::SettingsStore;
use crate::tasks::TaskRegistry;

/// What happened to a user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A job joined the user's queue at `position` (1 = next to run).
    Queued { job_id: JobId, position: usize },
    /// Added to the open caption batch, which now holds this many items.
    Collected(usize),
    /// Re-sent with a new caption without downloading.
    Resent(MessageRef),
    /// Routed to the audio reorder protocol.
    AudioOrder(ProbeOutcome),
    /// A reply to an open audio order prompt.
    AudioReply(ReplyOutcome),
    /// The extractor's variant list was offered under this message.
    VariantsOffered(MessageRef),
    /// Answered with a text reply only.
    Replied,
    /// Nothing to do for this input.
    Ignored,
}

/// Variant list offered for a site URL, keyed by its message.
#[derive(Debug, Clone)]
struct PendingVariants {
    owner: UserId,
    url: String,
    title: String,
    variants: Vec<Variant>,
}

pub struct Relay {
    config: Arc<RelayConfig>,
    platform: Arc<dyn MessagingPlatform>,
    fetch: Arc<dyn RemoteFetch>,
    settings: Arc<SettingsStore>,
    tasks: Arc<TaskRegistry>,
    queue: JobQueue,
    audio: AudioReorderProtocol,
    batches: BatchCollector,
    channels: ChannelStore,
    variants: Mutex<HashMap<MessageRef, PendingVariants>>,
}

impl Relay {
    pub fn new(
        config: Arc<RelayConfig>,
        platform: Arc<dyn MessagingPlatform>,
        tools: Arc<dyn MediaTools>,
        fetch: Arc<dyn RemoteFetch>,
        channels: ChannelStore,
    ) -> Self {
        let settings = Arc::new(SettingsStore::new());
        let tasks = Arc::new(TaskRegistry::new());
        let pipeline = Arc::new(MediaPipeline::new(
            Arc::clone(&config),
            Arc::clone(&platform),
            Arc::clone(&tools),
            Arc::clone(&fetch),
            Arc::clone(&settings),
        ));
        let handler = PipelineHandler::new(
            Arc::clone(&pipeline),
            Arc::clone(&platform),
            Arc::clone(&tasks),
        );
        let queue = JobQueue::new(Arc::new(handler));
        let audio = AudioReorderProtocol::new(
            Arc::clone(&config),
            Arc::clone(&platform),
            tools,
            pipeline,
            Arc::clone(&tasks),
        );

        Self {
            config,
            platform,
            fetch,
            settings,
            tasks,
            queue,
            audio,
            batches: BatchCollector::new(),
            channels,
            variants: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn audio(&self) -> &AudioReorderProtocol {
        &self.audio
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Wait for every queued job and spawned remux to finish.
    pub async fn wait_idle(&self) -> Vec<JobOutcome> {
        self.queue.wait_idle().await;
        self.audio.wait_idle().await
    }

    // ------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------

    /// A forwarded file. Audio-change mode probes tracks, caption-only mode
    /// resends or collects, everything else is queued for the pipeline.
    pub async fn submit_attachment(
        &self,
        user: UserId,
        chat: ChatId,
        attachment: Attachment,
    ) -> WorkerResult<Submission> {
        if self.settings.audio_change(user).await {
            let outcome = self.audio.begin(user, chat, &attachment).await?;
            return Ok(Submission::AudioOrder(outcome));
        }

        if self.settings.caption_only(user).await {
            if let Some(count) = self.batches.collect(user, attachment.clone()) {
                self.show_batch_count(user, chat, count).await?;
                return Ok(Submission::Collected(count));
            }
            return self.resend_caption_only(user, chat, &attachment).await;
        }

        let name = attachment.display_name();
        self.enqueue(user, chat, MediaSource::Attachment { attachment }, name, None)
            .await
    }

    /// A file already on local disk, optionally renamed.
    pub async fn submit_local_file(
        &self,
        user: UserId,
        chat: ChatId,
        path: PathBuf,
        rename: Option<&str>,
    ) -> WorkerResult<Submission> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.mp4".to_string());
        let naming = rename.map(|r| Naming::Fixed(renamed(r, &name)));
        self.enqueue(user, chat, MediaSource::LocalFile { path }, name, naming)
            .await
    }

    /// Re-upload an attachment under a user-chosen name.
    pub async fn rename(
        &self,
        user: UserId,
        chat: ChatId,
        attachment: Attachment,
        new_name: &str,
    ) -> WorkerResult<Submission> {
        if sanitize_filename(new_name).trim().is_empty() {
            self.platform
                .send_text(chat, "Give the new file name after the command.")
                .await?;
            return Ok(Submission::Replied);
        }
        let name = attachment.display_name();
        let fixed = renamed(new_name, &name);
        self.enqueue(
            user,
            chat,
            MediaSource::Attachment { attachment },
            name,
            Some(Naming::Fixed(fixed)),
        )
        .await
    }

    /// A URL. Site URLs are offered to the extractor first; drive links fall
    /// back to the confirm-token download when extraction fails.
    pub async fn submit_url(
        &self,
        user: UserId,
        chat: ChatId,
        url: &str,
    ) -> WorkerResult<Submission> {
        let url = url.trim();
        if !self.fetch.extractor_available() {
            return self.enqueue_plain_url(user, chat, url).await;
        }

        let cancel = self.tasks.register(user);
        let listed = self.fetch.list_variants(url, &cancel).await;
        self.tasks.release(user, &cancel);

        let info = match listed {
            Ok(info) => info,
            Err(e) if e.is_cancelled() => {
                self.platform.send_text(chat, "Operation cancelled.").await?;
                return Ok(Submission::Replied);
            }
            Err(e) if is_drive_url(url) => {
                debug!(user = %user, "Extractor declined drive URL: {}", e);
                return self.enqueue_plain_url(user, chat, url).await;
            }
            Err(e) => {
                warn!(user = %user, "URL extraction failed: {}", e);
                self.platform
                    .send_text(chat, &format!("URL extract error: {}", e))
                    .await?;
                return Ok(Submission::Replied);
            }
        };

        let prompt = self
            .platform
            .send_text(chat, &variant_list_text(&info.title, &info.variants))
            .await?;
        self.variants.lock().await.insert(
            prompt,
            PendingVariants {
                owner: user,
                url: url.to_string(),
                title: info.title,
                variants: info.variants,
            },
        );
        Ok(Submission::VariantsOffered(prompt))
    }

    /// Pick entry `choice` (1-based) from the variant list sent as `prompt`.
    pub async fn choose_variant(
        &self,
        user: UserId,
        chat: ChatId,
        prompt: MessageRef,
        choice: usize,
    ) -> WorkerResult<Submission> {
        let (checked, offered) = {
            let mut variants = self.variants.lock().await;
            let checked = variants.get(&prompt).map(|p| (p.owner, p.variants.len()));
            let offered = match checked {
                Some((owner, count)) if owner == user && (1..=count).contains(&choice) => {
                    variants.remove(&prompt)
                }
                _ => None,
            };
            (checked, offered)
        };

        let offered = match (checked, offered) {
            (_, Some(offered)) => offered,
            (Some((owner, _)), None) if owner != user => {
                self.platform
                    .send_text(chat, "This selection belongs to another user.")
                    .await?;
                return Ok(Submission::Replied);
            }
            (Some((_, count)), None) => {
                self.platform
                    .send_text(chat, &format!("Choose a number from 1 to {}.", count))
                    .await?;
                return Ok(Submission::Replied);
            }
            (None, None) => {
                self.platform
                    .send_text(chat, "This selection has expired. Send the link again.")
                    .await?;
                return Ok(Submission::Replied);
            }
        };

        let variant = offered.variants[choice - 1].clone();
        let _ = self
            .platform
            .delete_messages(prompt.chat, &[prompt.message_id])
            .await;
        let name = sanitize_filename(&offered.title);
        self.enqueue(
            user,
            chat,
            MediaSource::Extracted {
                url: offered.url,
                title: offered.title,
                variant,
            },
            name,
            None,
        )
        .await
    }

    async fn enqueue_plain_url(
        &self,
        user: UserId,
        chat: ChatId,
        url: &str,
    ) -> WorkerResult<Submission> {
        let name = match extract_drive_id(url) {
            Some(id) if is_drive_url(url) => format!("drive_{}.mp4", sanitize_filename(&id)),
            _ => filename_from_url(url, "download.mp4"),
        };
        self.enqueue(
            user,
            chat,
            MediaSource::Url {
                url: url.to_string(),
            },
            name,
            None,
        )
        .await
    }

    async fn enqueue(
        &self,
        user: UserId,
        chat: ChatId,
        source: MediaSource,
        name: String,
        naming: Option<Naming>,
    ) -> WorkerResult<Submission> {
        let cancel = self.tasks.register(user);
        let status = match self
            .platform
            .send_text(chat, &format!("Queue: Processing started for `{}`...", name))
            .await
        {
            Ok(status) => status,
            Err(e) => {
                self.tasks.release(user, &cancel);
                return Err(e.into());
            }
        };

        let mut job = Job::new(user, chat, source, name, cancel).with_status(status);
        if let Some(naming) = naming {
            job = job.with_naming(naming);
        }
        let job_id = job.id.clone();
        let position = self.queue.enqueue(job);
        Ok(Submission::Queued { job_id, position })
    }

    // ------------------------------------------------------------------
    // Text and cancel
    // ------------------------------------------------------------------

    /// A plain text message, possibly a reply to one of our prompts.
    pub async fn handle_text(
        &self,
        user: UserId,
        message: MessageRef,
        reply_to: Option<MessageRef>,
        text: &str,
    ) -> WorkerResult<Submission> {
        let chat = message.chat;
        let trimmed = text.trim();

        if self.settings.caption_only(user).await {
            match trimmed.to_ascii_lowercase().as_str() {
                "on" => return self.start_batch(user, chat).await,
                "off" => return self.stop_batch(user, chat).await,
                "ok" => return self.process_batch(user, chat).await,
                _ => {}
            }
        }

        if self.settings.awaiting_template(user).await {
            self.settings.save_template(user, text).await;
            self.platform.send_text(chat, "Caption template saved.").await?;
            return Ok(Submission::Replied);
        }

        if let Some(prompt) = reply_to {
            if self.audio.is_pending(prompt).await {
                let outcome = self.audio.handle_reply(user, prompt, message, trimmed).await?;
                return Ok(Submission::AudioReply(outcome));
            }
            if self.variants.lock().await.contains_key(&prompt) {
                if let Ok(choice) = trimmed.parse::<usize>() {
                    return self.choose_variant(user, chat, prompt, choice).await;
                }
            }
        }

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return self.submit_url(user, chat, trimmed).await;
        }
        Ok(Submission::Ignored)
    }

    /// Cancel pressed. An open audio order tied to `prompt` is cancelled on
    /// its own; otherwise every registered task of the user is signalled.
    pub async fn cancel(
        &self,
        user: UserId,
        chat: ChatId,
        prompt: Option<MessageRef>,
    ) -> WorkerResult<usize> {
        if let Some(prompt) = prompt {
            if let Some(cancelled) = self.audio.cancel(user, prompt).await {
                self.platform.send_text(chat, "Audio order cancelled.").await?;
                return Ok(cancelled);
            }
        }

        let cancelled = self.tasks.cancel_all(user);
        info!(user = %user, cancelled = cancelled, "Cancel requested");
        let text = if cancelled == 0 {
            "No active tasks to cancel.".to_string()
        } else {
            format!("Cancelled {} tasks.", cancelled)
        };
        self.platform.send_text(chat, &text).await?;
        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // Caption-only mode and batches
    // ------------------------------------------------------------------

    async fn resend_caption_only(
        &self,
        user: UserId,
        chat: ChatId,
        attachment: &Attachment,
    ) -> WorkerResult<Submission> {
        let Some(caption) = self.settings.render_template(user).await else {
            self.platform
                .send_text(chat, "No saved caption. Set one first with set caption.")
                .await?;
            return Ok(Submission::Replied);
        };
        let as_video = attachment.kind == MediaKind::Video || attachment.metadata.duration > 0;
        let sent = self
            .platform
            .resend(&ResendRequest {
                chat,
                attachment: attachment.clone(),
                caption,
                as_video,
            })
            .await?;
        Ok(Submission::Resent(sent))
    }

    async fn show_batch_count(&self, user: UserId, chat: ChatId, count: usize) -> WorkerResult<()> {
        let text = format!("Collected {} files. Send ok to caption them.", count);
        match self.batches.status(user) {
            Some(status) => {
                if let Err(e) = self.platform.edit_text(&status, &text).await {
                    debug!("Failed to edit batch status: {}", e);
                }
            }
            None => {
                let status = self.platform.send_text(chat, &text).await?;
                self.batches.set_status(user, status);
            }
        }
        Ok(())
    }

    async fn start_batch(&self, user: UserId, chat: ChatId) -> WorkerResult<Submission> {
        self.batches.start(user);
        self.platform
            .send_text(chat, "Batch mode on. Forward files, then send ok.")
            .await?;
        Ok(Submission::Replied)
    }

    async fn stop_batch(&self, user: UserId, chat: ChatId) -> WorkerResult<Submission> {
        let text = if self.batches.discard(user) {
            "Batch mode off. Collected files discarded."
        } else {
            "Batch mode is not on."
        };
        self.platform.send_text(chat, text).await?;
        Ok(Submission::Replied)
    }

    /// Resend every collected item in order, pacing between items.
    async fn process_batch(&self, user: UserId, chat: ChatId) -> WorkerResult<Submission> {
        if !self.batches.is_active(user) {
            self.platform.send_text(chat, "Batch mode is not on.").await?;
            return Ok(Submission::Replied);
        }
        if self.settings.template(user).await.is_none() {
            self.platform
                .send_text(chat, "No saved caption. Set one first with set caption.")
                .await?;
            return Ok(Submission::Replied);
        }

        let (items, status) = self.batches.take(user);
        if items.is_empty() {
            self.platform.send_text(chat, "No files collected yet.").await?;
            return Ok(Submission::Replied);
        }

        self.platform
            .send_text(chat, &format!("Processing started for {} items...", items.len()))
            .await?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 && !self.config.batch_pacing.is_zero() {
                tokio::time::sleep(self.config.batch_pacing).await;
            }
            if let Err(e) = self.resend_caption_only(user, chat, item).await {
                warn!(user = %user, item = i + 1, "Batch resend failed: {}", e);
            }
        }
        if let Some(status) = status {
            let _ = self
                .platform
                .delete_messages(status.chat, &[status.message_id])
                .await;
        }
        self.platform.send_text(chat, "Batch processing complete.").await?;
        Ok(Submission::Replied)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// The next plain text message becomes the caption template.
    pub async fn begin_template(&self, user: UserId, chat: ChatId) -> WorkerResult<()> {
        self.settings.set_awaiting_template(user, true).await;
        self.platform
            .send_text(chat, "Send the caption template as your next message.")
            .await?;
        Ok(())
    }

    pub async fn view_template(&self, user: UserId, chat: ChatId) -> WorkerResult<Option<String>> {
        let template = self.settings.template(user).await;
        let text = match &template {
            Some(t) => format!("Saved caption:\n\n{}", t),
            None => "No saved caption.".to_string(),
        };
        self.platform.send_text(chat, &text).await?;
        Ok(template)
    }

    pub async fn delete_template(&self, user: UserId, chat: ChatId) -> WorkerResult<bool> {
        let deleted = self.settings.delete_template(user).await;
        let text = if deleted {
            "Caption template deleted."
        } else {
            "No saved caption."
        };
        self.platform.send_text(chat, text).await?;
        Ok(deleted)
    }

    /// Store a photo attachment as the user's thumbnail.
    pub async fn set_custom_thumbnail(
        &self,
        user: UserId,
        chat: ChatId,
        photo: &Attachment,
    ) -> WorkerResult<PathBuf> {
        let dir = self.config.work_dir.join("thumbs");
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("thumb_{}_{}.jpg", user, JobId::new()));

        let cancel = self.tasks.register(user);
        let downloaded = self
            .platform
            .download_attachment(photo, &path, &cancel)
            .await;
        self.tasks.release(user, &cancel);
        if let Err(e) = downloaded {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        if let Some(old) = self.settings.set_custom_thumbnail(user, path.clone()).await {
            remove_thumbnail(&old).await;
        }
        self.platform.send_text(chat, "Custom thumbnail saved.").await?;
        Ok(path)
    }

    /// Switch to frame thumbnails taken at the parsed offset.
    pub async fn set_thumbnail_offset(
        &self,
        user: UserId,
        chat: ChatId,
        input: &str,
    ) -> WorkerResult<Option<u64>> {
        let offset = match parse_time(input) {
            Ok(offset) => offset,
            Err(e) => {
                self.platform
                    .send_text(
                        chat,
                        &format!("Invalid time ({}). Use e.g. 5s, 1m, 1m 30s or 1h.", e),
                    )
                    .await?;
                return Ok(None);
            }
        };

        if let Some(old) = self.settings.clear_thumbnail(user).await {
            remove_thumbnail(&old).await;
        }
        self.settings.set_thumbnail_offset(user, offset).await;
        self.platform
            .send_text(chat, &format!("Thumbnail frame set to {} seconds.", offset))
            .await?;
        Ok(Some(offset))
    }

    pub async fn delete_thumbnail(&self, user: UserId, chat: ChatId) -> WorkerResult<()> {
        if let Some(old) = self.settings.clear_thumbnail(user).await {
            remove_thumbnail(&old).await;
        }
        self.platform
            .send_text(chat, "Thumbnail settings cleared.")
            .await?;
        Ok(())
    }

    /// Turning caption-only off also drops any open batch.
    pub async fn set_caption_only(
        &self,
        user: UserId,
        chat: ChatId,
        enabled: bool,
    ) -> WorkerResult<()> {
        self.settings.set_caption_only(user, enabled).await;
        if !enabled {
            self.batches.discard(user);
        }
        let text = if enabled {
            "Caption-only mode ON."
        } else {
            "Caption-only mode OFF."
        };
        self.platform.send_text(chat, text).await?;
        Ok(())
    }

    pub async fn set_audio_change(
        &self,
        user: UserId,
        chat: ChatId,
        enabled: bool,
    ) -> WorkerResult<()> {
        self.settings.set_audio_change(user, enabled).await;
        let text = if enabled {
            "Audio change mode ON."
        } else {
            "Audio change mode OFF."
        };
        self.platform.send_text(chat, text).await?;
        Ok(())
    }

    pub async fn mode_summary(&self, user: UserId) -> String {
        let settings = self.settings.snapshot(user).await;
        format!(
            "Caption-only mode: {}\nAudio change mode: {}\nPending audio orders: {}",
            on_off(settings.caption_only),
            on_off(settings.audio_change),
            self.audio.pending_count(user).await
        )
    }

    // ------------------------------------------------------------------
    // Saved channels
    // ------------------------------------------------------------------

    pub async fn save_channel(&self, chat: ChatId, id: &str, name: &str) -> WorkerResult<()> {
        self.channels.save(id, name).await?;
        self.platform
            .send_text(chat, &format!("Channel {} saved.", name))
            .await?;
        Ok(())
    }

    pub async fn remove_channel(&self, chat: ChatId, id: &str) -> WorkerResult<bool> {
        let removed = self.channels.remove(id).await?;
        let text = if removed {
            "Channel removed."
        } else {
            "Channel not found."
        };
        self.platform.send_text(chat, text).await?;
        Ok(removed)
    }

    pub async fn list_channels(&self) -> Vec<(String, String)> {
        self.channels.list().await
    }
}

/// Sanitized user name; inherits the original extension when it has none.
fn renamed(new_name: &str, original: &str) -> String {
    let name = sanitize_filename(new_name.trim());
    if extension_of(&name).is_empty() {
        format!("{}{}", name, extension_of(original))
    } else {
        name
    }
}

fn variant_list_text(title: &str, variants: &[Variant]) -> String {
    let mut text = format!("{}\n\nReply with the number of a quality:\n", title);
    for (i, variant) in variants.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, variant.label));
    }
    text
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

async fn remove_thumbnail(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove old thumbnail {}: {}", path.display(), e);
        }
    }
}
