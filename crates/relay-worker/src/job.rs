//! Queued units of work.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use relay_media::{CancelToken, StreamMap};
use relay_models::{ChatId, JobId, MediaSource, MessageRef, UserId};

/// How the uploaded file is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Naming {
    /// Brand plus the original extension.
    Brand,
    /// Exactly this (already sanitized) name.
    Fixed(String),
    /// Sanitized source title plus the downloaded file's extension.
    SourceTitle,
}

/// A submission waiting in, or running from, a user's queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub owner: UserId,
    pub chat: ChatId,
    pub source: MediaSource,
    /// Name as declared by the submitter, before branding.
    pub original_name: String,
    pub naming: Naming,
    /// Status message edited as the job progresses.
    pub status: Option<MessageRef>,
    pub cancel: CancelToken,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        owner: UserId,
        chat: ChatId,
        source: MediaSource,
        original_name: impl Into<String>,
        cancel: CancelToken,
    ) -> Self {
        let naming = match source {
            MediaSource::Extracted { .. } => Naming::SourceTitle,
            _ => Naming::Brand,
        };
        Self {
            id: JobId::new(),
            owner,
            chat,
            source,
            original_name: original_name.into(),
            naming,
            status: None,
            cancel,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_status(mut self, status: MessageRef) -> Self {
        self.status = Some(status);
        self
    }

    /// Metric label for the source kind.
    pub fn job_type(&self) -> &'static str {
        match self.source {
            MediaSource::LocalFile { .. } => "local",
            MediaSource::Attachment { .. } => "attachment",
            MediaSource::Url { .. } => "url",
            MediaSource::Extracted { .. } => "extracted",
        }
    }
}

/// Audio reorder of a file that is already local.
///
/// Runs outside the queue, so its upload contends for the owner's upload lock.
#[derive(Debug, Clone)]
pub struct RemuxJob {
    pub id: JobId,
    pub owner: UserId,
    pub chat: ChatId,
    /// Source file, removed when the job ends.
    pub path: PathBuf,
    pub original_name: String,
    pub map: StreamMap,
    pub status: Option<MessageRef>,
    /// Prompt and reply messages removed after the job.
    pub cleanup_messages: Vec<i64>,
    pub cancel: CancelToken,
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Uploaded(MessageRef),
    Cancelled,
    Failed(String),
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Uploaded(_) => "uploaded",
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::Failed(_) => "failed",
        }
    }
}
