//! Per-user registry of live cancel tokens.

use std::collections::HashMap;
use std::sync::Mutex;

use relay_media::CancelToken;
use relay_models::UserId;
use tracing::debug;

/// Tracks every cancellable unit of work a user owns, queued or running.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tokens: Mutex<HashMap<UserId, Vec<CancelToken>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for `user`.
    pub fn register(&self, user: UserId) -> CancelToken {
        let token = CancelToken::new();
        self.insert(user, token.clone());
        token
    }

    /// Register an existing token (e.g. one shared with a pending prompt).
    pub fn insert(&self, user: UserId, token: CancelToken) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.entry(user).or_default().push(token);
    }

    /// Drop a finished token. The user's entry goes away with its last token.
    pub fn release(&self, user: UserId, token: &CancelToken) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = tokens.get_mut(&user) {
            list.retain(|t| !t.same_token(token));
            if list.is_empty() {
                tokens.remove(&user);
            }
        }
    }

    /// Signal every token the user owns. Returns how many were registered.
    pub fn cancel_all(&self, user: UserId) -> usize {
        let list = {
            let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens.get(&user).cloned().unwrap_or_default()
        };
        for token in &list {
            token.cancel();
        }
        debug!(user = %user, count = list.len(), "Cancelled user tasks");
        list.len()
    }

    /// Number of live tokens for `user`.
    pub fn active(&self, user: UserId) -> usize {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.get(&user).map(Vec::len).unwrap_or(0)
    }
}
