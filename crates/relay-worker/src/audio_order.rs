//! Interactive audio track reordering.
//!
//! A file sent in audio-change mode is downloaded and probed. One audio
//! track is remuxed straight away; several tracks produce a numbered prompt
//! and the owner replies to it with the order to keep (e.g. `2,1`). The
//! remux runs as a tracked child task outside the user's queue.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use relay_media::{CancelToken, MediaTools, StreamMap};
use relay_models::{sanitize_filename, Attachment, ChatId, JobId, MediaKind, MessageRef, Track, UserId};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{record_outcome, report_outcome};
use crate::job::{JobOutcome, RemuxJob};
use crate::pipeline::MediaPipeline;
use crate::platform::MessagingPlatform;
use crate::tasks::TaskRegistry;

/// Why a reply could not be turned into a track order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackSelectionError {
    #[error("Give at least one track number.")]
    Empty,

    #[error("Invalid format: `{0}`. Send comma-separated numbers, e.g. `1,3`.")]
    NotANumber(String),

    #[error("Invalid track number: {value}. Valid track numbers: {}", valid_range(.max))]
    OutOfRange { value: usize, max: usize },

    #[error("Track {0} is listed more than once.")]
    Duplicate(usize),
}

fn valid_range(max: &usize) -> String {
    (1..=*max)
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a reply like `2, 1` into 0-based track positions.
///
/// Numbers are 1-based, must be distinct and no greater than `track_count`.
pub fn parse_track_order(input: &str, track_count: usize) -> Result<Vec<usize>, TrackSelectionError> {
    let parts: Vec<&str> = input
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return Err(TrackSelectionError::Empty);
    }

    let mut seen = HashSet::new();
    let mut order = Vec::with_capacity(parts.len());
    for part in parts {
        let value: usize = part
            .parse()
            .map_err(|_| TrackSelectionError::NotANumber(part.to_string()))?;
        if value == 0 || value > track_count {
            return Err(TrackSelectionError::OutOfRange {
                value,
                max: track_count,
            });
        }
        if !seen.insert(value) {
            return Err(TrackSelectionError::Duplicate(value));
        }
        order.push(value - 1);
    }
    Ok(order)
}

/// Source stream map for a parsed order.
pub fn stream_map_for(tracks: &[Track], order: &[usize]) -> WorkerResult<StreamMap> {
    let indices = order
        .iter()
        .map(|&i| tracks.get(i).map(|t| t.stream_index))
        .collect::<Option<Vec<u32>>>()
        .ok_or_else(|| WorkerError::job_failed("track order does not match probed tracks"))?;
    Ok(StreamMap::new(indices)?)
}

/// A probed file waiting for its owner's reply.
#[derive(Debug)]
pub struct PendingAudioOrder {
    pub owner: UserId,
    pub chat: ChatId,
    pub path: PathBuf,
    pub original_name: String,
    pub tracks: Vec<Track>,
    cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    NotVideo,
    NoAudio,
    AutoRemux(JobId),
    AwaitingOrder { prompt: MessageRef, tracks: Vec<Track> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The reply was not aimed at a pending prompt.
    NotPending,
    /// The prompt belongs to another user.
    NotOwner,
    /// The selection was invalid; the prompt stays open.
    Rejected(TrackSelectionError),
    Accepted(JobId),
}

pub struct AudioReorderProtocol {
    config: Arc<RelayConfig>,
    platform: Arc<dyn MessagingPlatform>,
    tools: Arc<dyn MediaTools>,
    pipeline: Arc<MediaPipeline>,
    tasks: Arc<TaskRegistry>,
    pending: Mutex<HashMap<MessageRef, PendingAudioOrder>>,
    children: Mutex<JoinSet<JobOutcome>>,
}

impl AudioReorderProtocol {
    pub fn new(
        config: Arc<RelayConfig>,
        platform: Arc<dyn MessagingPlatform>,
        tools: Arc<dyn MediaTools>,
        pipeline: Arc<MediaPipeline>,
        tasks: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            config,
            platform,
            tools,
            pipeline,
            tasks,
            pending: Mutex::new(HashMap::new()),
            children: Mutex::new(JoinSet::new()),
        }
    }

    /// Download and probe an attachment, then remux or prompt.
    pub async fn begin(
        &self,
        owner: UserId,
        chat: ChatId,
        attachment: &Attachment,
    ) -> WorkerResult<ProbeOutcome> {
        if attachment.kind == MediaKind::Audio {
            self.platform.send_text(chat, "This is not a video file.").await?;
            return Ok(ProbeOutcome::NotVideo);
        }

        let cancel = self.tasks.register(owner);
        let result = self.probe_attachment(owner, chat, attachment, &cancel).await;
        let handed_off = matches!(
            result,
            Ok(ProbeOutcome::AutoRemux(_)) | Ok(ProbeOutcome::AwaitingOrder { .. })
        );
        if !handed_off {
            self.tasks.release(owner, &cancel);
        }
        result
    }

    async fn probe_attachment(
        &self,
        owner: UserId,
        chat: ChatId,
        attachment: &Attachment,
        cancel: &CancelToken,
    ) -> WorkerResult<ProbeOutcome> {
        let mut original_name = attachment
            .file_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("video_{}.mkv", attachment.message.message_id));
        if !original_name.contains('.') {
            original_name.push_str(".mkv");
        }

        let status = self
            .platform
            .send_text(chat, "Downloading file to analyze audio tracks...")
            .await?;

        let path = self.config.work_dir.join(format!(
            "audio_{}_{}_{}",
            owner,
            JobId::new(),
            sanitize_filename(&original_name)
        ));

        if let Err(e) = self
            .platform
            .download_attachment(attachment, &path, cancel)
            .await
        {
            remove_quietly(&path).await;
            let err = WorkerError::from(e);
            let _ = self.platform.edit_text(&status, &err.user_message()).await;
            return Err(err);
        }

        let tracks = match self.tools.audio_tracks(&path).await {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!(user = %owner, "Audio track probe failed: {}", e);
                Vec::new()
            }
        };

        match tracks.len() {
            0 => {
                remove_quietly(&path).await;
                let _ = self
                    .platform
                    .edit_text(&status, "No audio track found in this file.")
                    .await;
                Ok(ProbeOutcome::NoAudio)
            }
            1 => {
                let _ = self
                    .platform
                    .edit_text(&status, "File has 1 audio track. Remuxing automatically...")
                    .await;
                let map = stream_map_for(&tracks, &[0])?;
                let job = RemuxJob {
                    id: JobId::new(),
                    owner,
                    chat,
                    path,
                    original_name,
                    map,
                    status: Some(status),
                    cleanup_messages: Vec::new(),
                    cancel: cancel.clone(),
                };
                let id = job.id.clone();
                self.spawn_remux(job).await;
                Ok(ProbeOutcome::AutoRemux(id))
            }
            _ => {
                let _ = self.platform.edit_text(&status, &prompt_text(&tracks)).await;
                info!(user = %owner, prompt = %status, tracks = tracks.len(), "Awaiting audio order");
                self.pending.lock().await.insert(
                    status,
                    PendingAudioOrder {
                        owner,
                        chat,
                        path,
                        original_name,
                        tracks: tracks.clone(),
                        cancel: cancel.clone(),
                    },
                );
                Ok(ProbeOutcome::AwaitingOrder {
                    prompt: status,
                    tracks,
                })
            }
        }
    }

    /// Handle a text reply to `reply_to`.
    pub async fn handle_reply(
        &self,
        owner: UserId,
        reply_to: MessageRef,
        reply: MessageRef,
        text: &str,
    ) -> WorkerResult<ReplyOutcome> {
        let order = {
            let mut pending = self.pending.lock().await;
            let Some(entry) = pending.get(&reply_to) else {
                return Ok(ReplyOutcome::NotPending);
            };
            if entry.owner != owner {
                drop(pending);
                self.platform
                    .send_text(reply.chat, "You cannot choose the order for this file.")
                    .await?;
                return Ok(ReplyOutcome::NotOwner);
            }

            match parse_track_order(text, entry.tracks.len()) {
                Ok(order) => {
                    let entry = pending
                        .remove(&reply_to)
                        .ok_or_else(|| WorkerError::job_failed("pending order vanished"))?;
                    Ok((entry, order))
                }
                Err(e) => Err(e),
            }
        };

        let (entry, order) = match order {
            Ok(accepted) => accepted,
            Err(e) => {
                self.platform.send_text(reply.chat, &e.to_string()).await?;
                return Ok(ReplyOutcome::Rejected(e));
            }
        };

        let map = match stream_map_for(&entry.tracks, &order) {
            Ok(map) => map,
            Err(e) => {
                remove_quietly(&entry.path).await;
                self.tasks.release(owner, &entry.cancel);
                return Err(e);
            }
        };
        let status = self
            .platform
            .send_text(entry.chat, "Changing audio order...")
            .await
            .ok();

        let job = RemuxJob {
            id: JobId::new(),
            owner,
            chat: entry.chat,
            path: entry.path,
            original_name: entry.original_name,
            map,
            status,
            cleanup_messages: vec![reply_to.message_id, reply.message_id],
            cancel: entry.cancel,
        };
        let id = job.id.clone();
        self.spawn_remux(job).await;
        Ok(ReplyOutcome::Accepted(id))
    }

    /// Cancel pressed on `prompt`. Returns the number of signalled tasks when
    /// the prompt was an open order owned by `owner`, `None` otherwise.
    pub async fn cancel(&self, owner: UserId, prompt: MessageRef) -> Option<usize> {
        let entry = {
            let mut pending = self.pending.lock().await;
            match pending.get(&prompt) {
                Some(entry) if entry.owner == owner => pending.remove(&prompt),
                _ => None,
            }
        }?;

        remove_quietly(&entry.path).await;
        let cancelled = self.tasks.cancel_all(owner);
        self.tasks.release(owner, &entry.cancel);
        if let Err(e) = self
            .platform
            .delete_messages(prompt.chat, &[prompt.message_id])
            .await
        {
            debug!("Failed to delete audio prompt: {}", e);
        }
        info!(user = %owner, prompt = %prompt, "Audio order cancelled");
        Some(cancelled)
    }

    /// Open prompts owned by `owner`.
    pub async fn pending_count(&self, owner: UserId) -> usize {
        self.pending
            .lock()
            .await
            .values()
            .filter(|p| p.owner == owner)
            .count()
    }

    pub async fn is_pending(&self, prompt: MessageRef) -> bool {
        self.pending.lock().await.contains_key(&prompt)
    }

    async fn spawn_remux(&self, job: RemuxJob) {
        let pipeline = Arc::clone(&self.pipeline);
        let platform = Arc::clone(&self.platform);
        let tasks = Arc::clone(&self.tasks);

        let mut children = self.children.lock().await;
        while let Some(finished) = children.try_join_next() {
            if let Err(e) = finished {
                error!("Audio remux task failed: {}", e);
            }
        }
        children.spawn(async move {
            let outcome = pipeline.run_remux(&job).await;
            tasks.release(job.owner, &job.cancel);
            record_outcome("remux", &outcome);
            report_outcome(platform.as_ref(), job.chat, job.status, &outcome).await;
            outcome
        });
    }

    /// Wait for every spawned remux to finish.
    pub async fn wait_idle(&self) -> Vec<JobOutcome> {
        let mut children = std::mem::take(&mut *self.children.lock().await);
        let mut outcomes = Vec::new();
        while let Some(finished) = children.join_next().await {
            match finished {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Audio remux task failed: {}", e),
            }
        }
        outcomes
    }
}

fn prompt_text(tracks: &[Track]) -> String {
    let mut text = String::from("Audio tracks in this file:\n\n");
    for (i, track) in tracks.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, track.describe()));
    }
    text.push_str(
        "\nReply to this message with the track numbers to keep, separated by commas.\n\
         For example `1,3` keeps tracks 1 and 3 in that order, `2` keeps only track 2.\n\
         \nPress Cancel on this message to abort.",
    );
    text
}

async fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
