//! Bridges the queue to the pipeline and reports outcomes to the user.

use std::sync::Arc;

use async_trait::async_trait;
use relay_models::{ChatId, MessageRef};
use tracing::debug;

use crate::job::{Job, JobOutcome};
use crate::metrics;
use crate::pipeline::MediaPipeline;
use crate::platform::MessagingPlatform;
use crate::queue::JobHandler;
use crate::tasks::TaskRegistry;

pub struct PipelineHandler {
    pipeline: Arc<MediaPipeline>,
    platform: Arc<dyn MessagingPlatform>,
    tasks: Arc<TaskRegistry>,
}

impl PipelineHandler {
    pub fn new(
        pipeline: Arc<MediaPipeline>,
        platform: Arc<dyn MessagingPlatform>,
        tasks: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            pipeline,
            platform,
            tasks,
        }
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn handle(&self, job: Job) -> JobOutcome {
        let outcome = self.pipeline.run(&job).await;
        self.tasks.release(job.owner, &job.cancel);
        record_outcome(job.job_type(), &outcome);
        report_outcome(self.platform.as_ref(), job.chat, job.status, &outcome).await;
        outcome
    }

    async fn handle_panic(&self, job: &Job, message: String) {
        self.tasks.release(job.owner, &job.cancel);
        let outcome = JobOutcome::Failed(format!("Error: internal failure ({})", message));
        record_outcome(job.job_type(), &outcome);
        report_outcome(self.platform.as_ref(), job.chat, job.status, &outcome).await;
    }
}

pub fn record_outcome(job_type: &str, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Uploaded(_) => metrics::record_job_completed(job_type),
        JobOutcome::Cancelled => metrics::record_job_cancelled(job_type),
        JobOutcome::Failed(_) => metrics::record_job_failed(job_type),
    }
}

/// Edit the job's status message with a terminal outcome, or post a new
/// message when the job has none. Successful uploads need no report.
pub async fn report_outcome(
    platform: &dyn MessagingPlatform,
    chat: ChatId,
    status: Option<MessageRef>,
    outcome: &JobOutcome,
) {
    let text = match outcome {
        JobOutcome::Uploaded(_) => return,
        JobOutcome::Cancelled => "Operation cancelled.",
        JobOutcome::Failed(message) => message.as_str(),
    };

    let result = match status {
        Some(status) => platform.edit_text(&status, text).await,
        None => platform.send_text(chat, text).await.map(|_| ()),
    };
    if let Err(e) = result {
        debug!("Failed to report job outcome: {}", e);
    }
}
