//! Per-user FIFO job queues.
//!
//! Each user has at most one worker. Enqueueing starts a worker when none is
//! running; the worker drains the user's queue in submission order and
//! removes the user's state when the queue is empty. Different users run in
//! parallel.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relay_models::UserId;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::job::{Job, JobOutcome};
use crate::metrics;

/// Runs dequeued jobs.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job) -> JobOutcome;

    /// Called when `handle` panicked, so the owner still gets a status.
    async fn handle_panic(&self, job: &Job, message: String);
}

#[derive(Debug, Default)]
struct UserQueueState {
    pending: VecDeque<Job>,
    running: bool,
}

struct QueueInner {
    users: Mutex<HashMap<UserId, UserQueueState>>,
    handler: Arc<dyn JobHandler>,
    idle: Notify,
}

impl QueueInner {
    fn users(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, UserQueueState>> {
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registry of per-user queues sharing one handler.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(handler: Arc<dyn JobHandler>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                users: Mutex::new(HashMap::new()),
                handler,
                idle: Notify::new(),
            }),
        }
    }

    /// Append a job to its owner's queue. Returns the number of jobs now
    /// waiting for that user, including this one.
    pub fn enqueue(&self, job: Job) -> usize {
        let user = job.owner;
        let job_type = job.job_type();
        let (position, start_worker) = {
            let mut users = self.inner.users();
            let state = users.entry(user).or_default();
            state.pending.push_back(job);
            let start = !state.running;
            state.running = true;
            (state.pending.len(), start)
        };

        metrics::record_job_enqueued(job_type);
        metrics::set_queue_pending(self.total_pending());
        info!(user = %user, position = position, "Job enqueued");

        if start_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(worker_loop(inner, user));
        }
        position
    }

    /// Jobs waiting (not running) for `user`.
    pub fn pending_count(&self, user: UserId) -> usize {
        self.inner
            .users()
            .get(&user)
            .map(|s| s.pending.len())
            .unwrap_or(0)
    }

    /// Whether a worker is running for `user`.
    pub fn is_active(&self, user: UserId) -> bool {
        self.inner
            .users()
            .get(&user)
            .map(|s| s.running)
            .unwrap_or(false)
    }

    pub fn total_pending(&self) -> usize {
        self.inner.users().values().map(|s| s.pending.len()).sum()
    }

    /// Resolve once every user's queue has drained.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.users().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

async fn worker_loop(inner: Arc<QueueInner>, user: UserId) {
    debug!(user = %user, "Queue worker started");
    loop {
        let job = {
            let mut users = inner.users();
            let next = users.get_mut(&user).and_then(|s| s.pending.pop_front());
            match next {
                Some(job) => job,
                None => {
                    users.remove(&user);
                    drop(users);
                    inner.idle.notify_waiters();
                    debug!(user = %user, "Queue worker finished");
                    return;
                }
            }
        };

        let handler = Arc::clone(&inner.handler);
        let task_job = job.clone();
        let result = tokio::spawn(async move { handler.handle(task_job).await }).await;

        match result {
            Ok(outcome) => {
                debug!(user = %user, job_id = %job.id, outcome = outcome.as_str(), "Job finished")
            }
            Err(e) => {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                error!(user = %user, job_id = %job.id, "Job panicked: {}", message);
                inner.handler.handle_panic(&job, message).await;
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
