//! Media relay worker.
//!
//! This crate provides:
//! - Per-user FIFO job queues with one sequential worker per user
//! - The acquire, normalize, thumbnail, caption and upload pipeline
//! - Caption templates with counters, cyclic tokens and conditional text
//! - The interactive audio track reorder exchange
//! - A directory-backed platform for running the pipeline locally

pub mod audio_order;
pub mod batch;
pub mod caption;
pub mod channels;
pub mod config;
pub mod error;
pub mod handler;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod outbox;
pub mod pipeline;
pub mod platform;
pub mod queue;
pub mod relay;
pub mod retry;
pub mod settings;
pub mod sweeper;
pub mod tasks;
pub mod upload;

pub use audio_order::{AudioReorderProtocol, ProbeOutcome, ReplyOutcome, TrackSelectionError};
pub use caption::{CaptionEngine, CaptionTemplate};
pub use config::RelayConfig;
pub use error::{WorkerError, WorkerResult};
pub use job::{Job, JobOutcome, Naming, RemuxJob};
pub use logging::JobLogger;
pub use outbox::LocalOutbox;
pub use pipeline::MediaPipeline;
pub use platform::{MessagingPlatform, PlatformError, PlatformResult, ResendRequest, UploadRequest};
pub use queue::{JobHandler, JobQueue};
pub use relay::{Relay, Submission};
pub use settings::SettingsStore;
pub use tasks::TaskRegistry;
