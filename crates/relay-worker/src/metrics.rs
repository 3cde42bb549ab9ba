//! Prometheus metrics for the relay worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP listener on `port`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_ENQUEUED_TOTAL: &str = "relay_jobs_enqueued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "relay_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "relay_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "relay_jobs_cancelled_total";
    pub const QUEUE_PENDING: &str = "relay_queue_pending";

    // Upload metrics
    pub const UPLOAD_ATTEMPTS_TOTAL: &str = "relay_upload_attempts_total";
    pub const UPLOAD_DURATION_SECONDS: &str = "relay_upload_duration_seconds";
}

/// Record job enqueued.
pub fn record_job_enqueued(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

/// Record job completed.
pub fn record_job_completed(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

/// Record job failed.
pub fn record_job_failed(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record job cancelled by its owner.
pub fn record_job_cancelled(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_CANCELLED_TOTAL, &labels).increment(1);
}

/// Update the pending jobs gauge.
pub fn set_queue_pending(count: usize) {
    gauge!(names::QUEUE_PENDING).set(count as f64);
}

/// Record one upload attempt and its outcome.
pub fn record_upload_attempt(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::UPLOAD_ATTEMPTS_TOTAL, &labels).increment(1);
}

/// Record total upload duration including retries.
pub fn record_upload_duration(kind: &str, duration_secs: f64) {
    let labels = [("kind", kind.to_string())];
    histogram!(names::UPLOAD_DURATION_SECONDS, &labels).record(duration_secs);
}
