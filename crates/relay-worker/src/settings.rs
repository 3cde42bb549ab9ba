//! Per-user settings: caption template, thumbnail choice and mode toggles.

use std::collections::HashMap;
use std::path::PathBuf;

use relay_models::UserId;
use tokio::sync::Mutex;

use crate::caption::{default_caption, CaptionEngine};

#[derive(Debug, Clone, Default)]
pub struct UserSettings {
    pub caption: Option<CaptionEngine>,
    pub custom_thumbnail: Option<PathBuf>,
    pub thumbnail_offset_secs: Option<u64>,
    pub caption_only: bool,
    pub audio_change: bool,
    /// Next plain text message becomes the caption template.
    pub awaiting_template: bool,
}

/// Thumbnail decision for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailChoice {
    Custom(PathBuf),
    Frame { offset_secs: Option<u64> },
}

#[derive(Debug, Default)]
pub struct SettingsStore {
    users: Mutex<HashMap<UserId, UserSettings>>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self, user: UserId) -> UserSettings {
        self.users.lock().await.get(&user).cloned().unwrap_or_default()
    }

    /// Save a template, restarting its counters.
    pub async fn save_template(&self, user: UserId, template: &str) {
        let mut users = self.users.lock().await;
        let settings = users.entry(user).or_default();
        settings.caption = Some(CaptionEngine::new(template));
        settings.awaiting_template = false;
    }

    /// Remove the template and its counters. Returns false if none was saved.
    pub async fn delete_template(&self, user: UserId) -> bool {
        let mut users = self.users.lock().await;
        users
            .get_mut(&user)
            .and_then(|s| s.caption.take())
            .is_some()
    }

    pub async fn template(&self, user: UserId) -> Option<String> {
        let users = self.users.lock().await;
        users
            .get(&user)
            .and_then(|s| s.caption.as_ref())
            .map(|c| c.template().to_string())
    }

    /// Caption for an upload named `target_name`.
    pub async fn render_caption(&self, user: UserId, target_name: &str) -> String {
        match self.render_template(user).await {
            Some(caption) => caption,
            None => default_caption(target_name),
        }
    }

    /// Render the saved template, `None` when there is none.
    pub async fn render_template(&self, user: UserId) -> Option<String> {
        let mut users = self.users.lock().await;
        users
            .get_mut(&user)
            .and_then(|s| s.caption.as_mut())
            .map(CaptionEngine::render)
    }

    pub async fn set_awaiting_template(&self, user: UserId, awaiting: bool) {
        self.users.lock().await.entry(user).or_default().awaiting_template = awaiting;
    }

    pub async fn awaiting_template(&self, user: UserId) -> bool {
        let users = self.users.lock().await;
        users.get(&user).map(|s| s.awaiting_template).unwrap_or(false)
    }

    /// Use a custom image as thumbnail. Clears any frame offset and returns
    /// the replaced image path so the caller can remove it.
    pub async fn set_custom_thumbnail(&self, user: UserId, path: PathBuf) -> Option<PathBuf> {
        let mut users = self.users.lock().await;
        let settings = users.entry(user).or_default();
        settings.thumbnail_offset_secs = None;
        settings.custom_thumbnail.replace(path)
    }

    /// Frame offset for generated thumbnails.
    pub async fn set_thumbnail_offset(&self, user: UserId, offset_secs: u64) {
        self.users.lock().await.entry(user).or_default().thumbnail_offset_secs = Some(offset_secs);
    }

    /// Forget both the custom image and the offset.
    pub async fn clear_thumbnail(&self, user: UserId) -> Option<PathBuf> {
        let mut users = self.users.lock().await;
        let settings = users.get_mut(&user)?;
        settings.thumbnail_offset_secs = None;
        settings.custom_thumbnail.take()
    }

    pub async fn thumbnail_choice(&self, user: UserId) -> ThumbnailChoice {
        let users = self.users.lock().await;
        match users.get(&user) {
            Some(UserSettings {
                custom_thumbnail: Some(path),
                ..
            }) => ThumbnailChoice::Custom(path.clone()),
            Some(settings) => ThumbnailChoice::Frame {
                offset_secs: settings.thumbnail_offset_secs,
            },
            None => ThumbnailChoice::Frame { offset_secs: None },
        }
    }

    pub async fn set_caption_only(&self, user: UserId, enabled: bool) {
        self.users.lock().await.entry(user).or_default().caption_only = enabled;
    }

    pub async fn caption_only(&self, user: UserId) -> bool {
        let users = self.users.lock().await;
        users.get(&user).map(|s| s.caption_only).unwrap_or(false)
    }

    pub async fn set_audio_change(&self, user: UserId, enabled: bool) {
        self.users.lock().await.entry(user).or_default().audio_change = enabled;
    }

    pub async fn audio_change(&self, user: UserId) -> bool {
        let users = self.users.lock().await;
        users.get(&user).map(|s| s.audio_change).unwrap_or(false)
    }
}
