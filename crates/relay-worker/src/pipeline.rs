//! Media pipeline: acquire, classify, normalize, thumbnail, probe, caption,
//! upload and cleanup for one job.
//!
//! Every blocking stage receives the job's cancel token. Temp files are
//! recorded in a [`Scratch`] list as soon as they are named and removed when
//! the job ends, whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use relay_media::{
    extract_drive_id, is_drive_url, target_container, CancelToken, MediaTools, RemoteFetch,
};
use relay_models::{
    branded_filename, extension_of, sanitize_filename, stem_of, ChatId, MediaKind, MediaSource,
    MessageRef, UserId, VideoMetadata,
};
use tracing::{debug, warn, Instrument};

use crate::config::RelayConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::job::{Job, JobOutcome, Naming, RemuxJob};
use crate::logging::JobLogger;
use crate::platform::{MessagingPlatform, UploadRequest};
use crate::retry::RetryConfig;
use crate::settings::{SettingsStore, ThumbnailChoice};
use crate::upload::UploadStage;

/// Temp files owned by one job.
#[derive(Debug, Default)]
pub struct Scratch {
    files: Vec<PathBuf>,
}

impl Scratch {
    pub fn track(&mut self, path: PathBuf) -> PathBuf {
        if !self.files.contains(&path) {
            self.files.push(path.clone());
        }
        path
    }

    pub async fn cleanup(mut self) {
        for path in std::mem::take(&mut self.files) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed temp file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
            }
        }
    }
}

/// Files still tracked here were skipped by `cleanup`, which only happens
/// when a stage panicked and unwound past it.
impl Drop for Scratch {
    fn drop(&mut self) {
        for path in self.files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed temp file {} after unwind", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
            }
        }
    }
}

/// Identity and handles shared by the stages of one run.
struct StageContext {
    owner: UserId,
    chat: ChatId,
    status: Option<MessageRef>,
    cancel: CancelToken,
    logger: JobLogger,
    /// Unique prefix for this run's temp files.
    tag: String,
}

/// A local file ready for the transform stages.
struct Acquired {
    path: PathBuf,
    /// Name the kind is classified from.
    source_name: String,
    upload_name: String,
    declared: Option<MediaKind>,
    hints: VideoMetadata,
}

/// Input to the shared transform and upload stages.
struct Deliverable {
    path: PathBuf,
    upload_name: String,
    kind: MediaKind,
    /// Run the container normalization remux (video only).
    normalize: bool,
    /// Platform-declared hints used when probing yields nothing.
    hints: VideoMetadata,
}

pub struct MediaPipeline {
    config: Arc<RelayConfig>,
    platform: Arc<dyn MessagingPlatform>,
    tools: Arc<dyn MediaTools>,
    fetch: Arc<dyn RemoteFetch>,
    settings: Arc<SettingsStore>,
    uploader: UploadStage,
}

impl MediaPipeline {
    pub fn new(
        config: Arc<RelayConfig>,
        platform: Arc<dyn MessagingPlatform>,
        tools: Arc<dyn MediaTools>,
        fetch: Arc<dyn RemoteFetch>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let retry = RetryConfig::new("upload")
            .with_max_attempts(config.upload_attempts)
            .with_backoff_unit(config.upload_backoff_unit);
        let uploader = UploadStage::new(platform.clone(), retry);
        Self {
            config,
            platform,
            tools,
            fetch,
            settings,
            uploader,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run a queued job to its terminal outcome.
    pub async fn run(&self, job: &Job) -> JobOutcome {
        let ctx = StageContext {
            owner: job.owner,
            chat: job.chat,
            status: job.status,
            cancel: job.cancel.clone(),
            logger: JobLogger::new(&job.id, job.owner, "relay"),
            tag: format!("{}_{}", job.owner, job.id),
        };
        let span = ctx.logger.create_span();
        ctx.logger.log_start(&job.source.describe());

        let mut scratch = Scratch::default();
        let result = self
            .execute(job, &ctx, &mut scratch)
            .instrument(span)
            .await;
        scratch.cleanup().await;

        self.outcome(&ctx, result)
    }

    /// Remux a local file with the chosen audio order, then deliver it.
    ///
    /// Unlike normalization, a failed remux here fails the job.
    pub async fn run_remux(&self, job: &RemuxJob) -> JobOutcome {
        let ctx = StageContext {
            owner: job.owner,
            chat: job.chat,
            status: job.status,
            cancel: job.cancel.clone(),
            logger: JobLogger::new(&job.id, job.owner, "audio_reorder"),
            tag: format!("{}_{}", job.owner, job.id),
        };
        let span = ctx.logger.create_span();
        ctx.logger.log_start(&format!(
            "reorder {} with audio streams {:?}",
            job.original_name,
            job.map.audio_streams()
        ));

        let mut scratch = Scratch::default();
        scratch.track(job.path.clone());
        let result = self
            .execute_remux(job, &ctx, &mut scratch)
            .instrument(span)
            .await;
        scratch.cleanup().await;

        if !job.cleanup_messages.is_empty() {
            if let Err(e) = self
                .platform
                .delete_messages(job.chat, &job.cleanup_messages)
                .await
            {
                debug!("Failed to delete prompt messages: {}", e);
            }
        }

        self.outcome(&ctx, result)
    }

    fn outcome(&self, ctx: &StageContext, result: WorkerResult<MessageRef>) -> JobOutcome {
        match result {
            Ok(message) => {
                ctx.logger.log_completion(&format!("uploaded as {}", message));
                JobOutcome::Uploaded(message)
            }
            Err(e) if e.is_cancelled() => {
                ctx.logger.log_warning("cancelled by user");
                JobOutcome::Cancelled
            }
            Err(e) => {
                ctx.logger.log_error(&e.to_string());
                JobOutcome::Failed(e.user_message())
            }
        }
    }

    async fn execute(
        &self,
        job: &Job,
        ctx: &StageContext,
        scratch: &mut Scratch,
    ) -> WorkerResult<MessageRef> {
        ctx.cancel.check()?;
        self.set_status(ctx, "Downloading...").await;
        let acquired = self.acquire(job, ctx, scratch).await?;
        ctx.cancel.check()?;

        let kind = MediaKind::classify(&acquired.source_name, acquired.declared);
        ctx.logger.log_progress(&format!(
            "acquired {} as {}",
            acquired.upload_name,
            kind.as_str()
        ));

        self.deliver(
            ctx,
            scratch,
            Deliverable {
                path: acquired.path,
                upload_name: acquired.upload_name,
                kind,
                normalize: true,
                hints: acquired.hints,
            },
        )
        .await
    }

    async fn execute_remux(
        &self,
        job: &RemuxJob,
        ctx: &StageContext,
        scratch: &mut Scratch,
    ) -> WorkerResult<MessageRef> {
        ctx.cancel.check()?;
        self.set_status(ctx, "Changing audio order...").await;

        let stem = sanitize_filename(stem_of(&job.original_name));
        let output = scratch.track(self.temp_path("reorder", ctx, &format!("{}.mkv", stem)));
        self.tools
            .reorder_audio(
                &job.path,
                &output,
                &job.map,
                &self.config.brand_name,
                &ctx.cancel,
            )
            .await?;

        let upload_name = branded_filename(&format!("{}.mkv", stem), &self.config.brand_name);
        self.deliver(
            ctx,
            scratch,
            Deliverable {
                path: output,
                upload_name,
                kind: MediaKind::Video,
                normalize: false,
                hints: VideoMetadata::default(),
            },
        )
        .await
    }

    async fn acquire(
        &self,
        job: &Job,
        ctx: &StageContext,
        scratch: &mut Scratch,
    ) -> WorkerResult<Acquired> {
        let max = self.config.max_file_bytes;
        let (path, source_name, declared, hints) = match &job.source {
            MediaSource::LocalFile { path } => {
                let dest = scratch.track(self.temp_path("local", ctx, &job.original_name));
                let size = tokio::fs::metadata(path).await?.len();
                if size > max {
                    return Err(WorkerError::SizeLimitExceeded { limit: max });
                }
                tokio::fs::copy(path, &dest).await?;
                (dest, job.original_name.clone(), None, VideoMetadata::default())
            }
            MediaSource::Attachment { attachment } => {
                if attachment.size.is_some_and(|s| s > max) {
                    return Err(WorkerError::SizeLimitExceeded { limit: max });
                }
                let dest = scratch.track(self.temp_path("dl", ctx, &job.original_name));
                let written = self
                    .platform
                    .download_attachment(attachment, &dest, &ctx.cancel)
                    .await?;
                if written > max {
                    return Err(WorkerError::SizeLimitExceeded { limit: max });
                }
                (
                    dest,
                    job.original_name.clone(),
                    Some(attachment.kind),
                    attachment.metadata,
                )
            }
            MediaSource::Url { url } => {
                let dest = scratch.track(self.temp_path("url", ctx, &job.original_name));
                let drive_id = if is_drive_url(url) {
                    extract_drive_id(url)
                } else {
                    None
                };
                match drive_id {
                    Some(id) => self.fetch.fetch_drive(&id, &dest, &ctx.cancel).await?,
                    None => self.fetch.fetch_url(url, &dest, &ctx.cancel).await?,
                };
                (dest, job.original_name.clone(), None, VideoMetadata::default())
            }
            MediaSource::Extracted {
                url,
                title,
                variant,
            } => {
                let stem = format!("ext_{}", ctx.tag);
                let path = self
                    .fetch
                    .download_variant(url, variant, &self.config.work_dir, &stem, &ctx.cancel)
                    .await?;
                let path = scratch.track(path);
                let size = tokio::fs::metadata(&path).await?.len();
                if size > max {
                    return Err(WorkerError::SizeLimitExceeded { limit: max });
                }
                let name = format!(
                    "{}{}",
                    sanitize_filename(title),
                    extension_of(&path.to_string_lossy())
                );
                let declared = variant.audio_only.then_some(MediaKind::Audio);
                (path, name, declared, VideoMetadata::default())
            }
        };

        let upload_name = match &job.naming {
            Naming::Brand => branded_filename(&source_name, &self.config.brand_name),
            Naming::Fixed(name) => name.clone(),
            Naming::SourceTitle => source_name.clone(),
        };

        Ok(Acquired {
            path,
            source_name,
            upload_name,
            declared,
            hints,
        })
    }

    /// Stages shared by queued and remux jobs: normalize, thumbnail, probe,
    /// caption and upload.
    async fn deliver(
        &self,
        ctx: &StageContext,
        scratch: &mut Scratch,
        item: Deliverable,
    ) -> WorkerResult<MessageRef> {
        let Deliverable {
            mut path,
            mut upload_name,
            kind,
            normalize,
            hints,
        } = item;
        let mut thumbnail = None;
        let mut metadata = VideoMetadata::default();

        if kind == MediaKind::Video {
            if normalize {
                self.set_status(ctx, "Processing...").await;
                match self.normalize(ctx, scratch, &path, &upload_name).await {
                    Ok((normalized, name)) => {
                        path = normalized;
                        upload_name = name;
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        ctx.logger
                            .log_warning(&format!("normalize failed, sending original: {}", e));
                    }
                }
            }
            ctx.cancel.check()?;

            thumbnail = self.thumbnail(ctx, scratch, &path).await?;
            ctx.cancel.check()?;

            let report = self.tools.probe(&path).await;
            if report.degraded {
                ctx.logger.log_warning("probe degraded, using fallback metadata");
            }
            metadata = if report.metadata.is_empty() {
                hints
            } else {
                report.metadata
            };
        }
        ctx.cancel.check()?;

        let caption = self.settings.render_caption(ctx.owner, &upload_name).await;
        let request = UploadRequest {
            chat: ctx.chat,
            path,
            kind,
            file_name: upload_name,
            caption,
            thumbnail,
            metadata,
            supports_streaming: kind == MediaKind::Video,
        };

        self.set_status(ctx, "Uploading...").await;
        let message = self.uploader.upload(ctx.owner, &request, &ctx.cancel).await?;

        if let Some(status) = ctx.status {
            if let Err(e) = self
                .platform
                .delete_messages(status.chat, &[status.message_id])
                .await
            {
                debug!("Failed to delete status message: {}", e);
            }
        }
        Ok(message)
    }

    /// Copy remux into the target container. Returns the new path and name.
    async fn normalize(
        &self,
        ctx: &StageContext,
        scratch: &mut Scratch,
        input: &Path,
        upload_name: &str,
    ) -> WorkerResult<(PathBuf, String)> {
        let codecs = match self.tools.audio_codecs(input).await {
            Ok(codecs) => codecs,
            Err(e) => {
                ctx.logger
                    .log_warning(&format!("could not read audio codecs: {}", e));
                Vec::new()
            }
        };
        let container = target_container(upload_name, &codecs);
        let stem = stem_of(upload_name);
        let name = format!("{}{}", stem, container.extension());

        let output = scratch.track(self.temp_path("norm", ctx, &name));
        self.tools
            .normalize(input, &output, &self.config.brand_name, &ctx.cancel)
            .await?;
        Ok((output, name))
    }

    async fn thumbnail(
        &self,
        ctx: &StageContext,
        scratch: &mut Scratch,
        video: &Path,
    ) -> WorkerResult<Option<PathBuf>> {
        let offset = match self.settings.thumbnail_choice(ctx.owner).await {
            ThumbnailChoice::Custom(path) if path.exists() => return Ok(Some(path)),
            ThumbnailChoice::Custom(_) => None,
            ThumbnailChoice::Frame { offset_secs } => offset_secs,
        };
        let offset = offset.unwrap_or(self.config.default_thumbnail_offset_secs);

        let output = scratch.track(self.temp_path("thumb", ctx, "frame.jpg"));
        match self
            .tools
            .thumbnail(video, &output, offset, &ctx.cancel)
            .await
        {
            Ok(()) => Ok(Some(output)),
            Err(e) if e.is_cancelled() => Err(WorkerError::Cancelled),
            Err(e) => {
                ctx.logger
                    .log_warning(&format!("thumbnail at {}s failed: {}", offset, e));
                Ok(None)
            }
        }
    }

    fn temp_path(&self, prefix: &str, ctx: &StageContext, name: &str) -> PathBuf {
        self.config
            .work_dir
            .join(format!("{}_{}_{}", prefix, ctx.tag, sanitize_filename(name)))
    }

    async fn set_status(&self, ctx: &StageContext, text: &str) {
        if let Some(status) = &ctx.status {
            if let Err(e) = self.platform.edit_text(status, text).await {
                debug!("Status update failed: {}", e);
            }
        }
    }
}
