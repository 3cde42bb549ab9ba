//! Upload stage: per-user serialization and retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use relay_media::CancelToken;
use relay_models::{MessageRef, UserId};
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::platform::{MessagingPlatform, PlatformError, UploadRequest};
use crate::retry::{retry_with_cancel, RetryConfig, RetryResult};

/// One async mutex per user, created on first use and dropped once no
/// upload holds or waits for it.
#[derive(Debug, Default)]
pub struct UploadLocks {
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle on `user`'s lock. The map entry lives as long as some handle does.
    pub fn lock_for(&self, user: UserId) -> UserLock<'_> {
        let lock = self.locks().entry(user).or_default().clone();
        UserLock {
            locks: self,
            user,
            lock,
        }
    }

    /// Users with a live lock entry.
    pub fn tracked_users(&self) -> usize {
        self.locks().len()
    }

    fn release(&self, user: UserId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks();
        let last_holder = locks
            .get(&user)
            .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(lock) == 2);
        if last_holder {
            locks.remove(&user);
        }
    }
}

/// A user's upload lock, removed from the registry when the last handle drops.
pub struct UserLock<'a> {
    locks: &'a UploadLocks,
    user: UserId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl UserLock<'_> {
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for UserLock<'_> {
    fn drop(&mut self) {
        self.locks.release(self.user, &self.lock);
    }
}

pub struct UploadStage {
    platform: Arc<dyn MessagingPlatform>,
    retry: RetryConfig,
    locks: UploadLocks,
}

impl UploadStage {
    pub fn new(platform: Arc<dyn MessagingPlatform>, retry: RetryConfig) -> Self {
        Self {
            platform,
            retry,
            locks: UploadLocks::new(),
        }
    }

    /// Upload under the owner's lock, retrying transient failures.
    ///
    /// Waiting for the lock, each attempt and each backoff all stop as soon
    /// as `cancel` fires.
    pub async fn upload(
        &self,
        owner: UserId,
        request: &UploadRequest,
        cancel: &CancelToken,
    ) -> WorkerResult<MessageRef> {
        let lock = self.locks.lock_for(owner);
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
            guard = lock.lock() => guard,
        };

        let started = Instant::now();
        let platform = &self.platform;
        let result = retry_with_cancel(
            &self.retry,
            cancel,
            |e: &PlatformError| matches!(e, PlatformError::Stopped),
            |attempt| async move {
                info!(
                    user = %owner,
                    attempt = attempt,
                    file = %request.file_name,
                    "Uploading"
                );
                let result = platform.upload(request, cancel).await;
                metrics::record_upload_attempt(if result.is_ok() { "ok" } else { "error" });
                result
            },
        )
        .await;
        metrics::record_upload_duration(request.kind.as_str(), started.elapsed().as_secs_f64());

        match result {
            RetryResult::Success(message) => Ok(message),
            RetryResult::Cancelled { attempts } => {
                info!(user = %owner, attempts = attempts, "Upload cancelled");
                Err(WorkerError::Cancelled)
            }
            RetryResult::Failed { error, attempts } => {
                warn!(user = %owner, attempts = attempts, "Upload failed: {}", error);
                Err(WorkerError::UploadFailed {
                    attempts,
                    message: error.to_string(),
                })
            }
        }
    }
}
