//! Structured job logging utilities.

use relay_models::{JobId, UserId};
use tracing::{error, info, warn, Span};

/// Job logger carrying the job id, owner and operation on every event.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    user: UserId,
    operation: String,
}

impl JobLogger {
    /// Create a logger for one job.
    ///
    /// # Arguments
    /// * `job_id` - The job's unique id
    /// * `user` - Submitting user
    /// * `operation` - Pipeline kind (e.g. "relay", "audio_reorder")
    pub fn new(job_id: &JobId, user: UserId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            user,
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            user = %self.user,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            user = %self.user,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            user = %self.user,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            user = %self.user,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            user = %self.user,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span wrapping the job's whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            user = %self.user,
            operation = %self.operation
        )
    }
}
