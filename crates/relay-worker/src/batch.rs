//! Batch collection for caption-only mode.

use std::collections::HashMap;
use std::sync::Mutex;

use relay_models::{Attachment, MessageRef, UserId};

#[derive(Debug, Default)]
struct BatchState {
    items: Vec<Attachment>,
    status: Option<MessageRef>,
}

/// Attachments collected per user until the batch is released.
#[derive(Debug, Default)]
pub struct BatchCollector {
    batches: Mutex<HashMap<UserId, BatchState>>,
}

impl BatchCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn batches(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, BatchState>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Begin collecting, dropping anything collected before.
    pub fn start(&self, user: UserId) {
        self.batches().insert(user, BatchState::default());
    }

    pub fn is_active(&self, user: UserId) -> bool {
        self.batches().contains_key(&user)
    }

    /// Add an attachment. Returns the new count, or `None` when not collecting.
    pub fn collect(&self, user: UserId, attachment: Attachment) -> Option<usize> {
        let mut batches = self.batches();
        let state = batches.get_mut(&user)?;
        state.items.push(attachment);
        Some(state.items.len())
    }

    /// Remember the running-count message so it can be edited in place.
    pub fn set_status(&self, user: UserId, status: MessageRef) {
        if let Some(state) = self.batches().get_mut(&user) {
            state.status = Some(status);
        }
    }

    pub fn status(&self, user: UserId) -> Option<MessageRef> {
        self.batches().get(&user).and_then(|s| s.status)
    }

    /// Stop collecting and drop the batch. Returns false if none was active.
    pub fn discard(&self, user: UserId) -> bool {
        self.batches().remove(&user).is_some()
    }

    /// Take the collected items, leaving an empty batch that keeps collecting.
    pub fn take(&self, user: UserId) -> (Vec<Attachment>, Option<MessageRef>) {
        match self.batches().get_mut(&user) {
            Some(state) => (std::mem::take(&mut state.items), state.status.take()),
            None => (Vec::new(), None),
        }
    }
}
