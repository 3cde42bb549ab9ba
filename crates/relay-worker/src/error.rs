//! Worker error types.

use relay_media::MediaError;
use thiserror::Error;

use crate::audio_order::TrackSelectionError;
use crate::platform::PlatformError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("File exceeds the {limit} byte limit")]
    SizeLimitExceeded { limit: u64 },

    #[error("Upload failed after {attempts} attempts: {message}")]
    UploadFailed { attempts: u32, message: String },

    #[error("Invalid track selection: {0}")]
    InvalidTrackSelection(#[from] TrackSelectionError),

    #[error("Remux failed: {0}")]
    RemuxFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Platform error: {0}")]
    Platform(PlatformError),

    #[error("Media error: {0}")]
    Media(MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<MediaError> for WorkerError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => Self::Cancelled,
            MediaError::SizeLimitExceeded { limit } => Self::SizeLimitExceeded { limit },
            MediaError::RemuxFailed { message, .. } => Self::RemuxFailed(message),
            MediaError::DownloadFailed { message } => Self::DownloadFailed(message),
            other => Self::Media(other),
        }
    }
}

impl From<PlatformError> for WorkerError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Stopped => Self::Cancelled,
            other => Self::Platform(other),
        }
    }
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if the error came from a user cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }

    /// Text shown to the user in the job's status message.
    pub fn user_message(&self) -> String {
        match self {
            WorkerError::Cancelled => "Operation cancelled.".to_string(),
            WorkerError::UploadFailed { message, .. } => format!("Upload failed: {}", message),
            WorkerError::SizeLimitExceeded { .. } => {
                "Error: file is larger than the 4GB limit.".to_string()
            }
            other => format!("Error: {}", other),
        }
    }
}
