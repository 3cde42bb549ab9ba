//! Saved channels, persisted as a flat JSON map of id to display name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::WorkerResult;

pub struct ChannelStore {
    path: PathBuf,
    channels: Mutex<BTreeMap<String, String>>,
}

impl ChannelStore {
    /// Load from `path`. A missing or unreadable file yields an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let channels = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(channels) => channels,
                Err(e) => {
                    warn!("Ignoring corrupt channels file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read channels file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        info!("Loaded {} saved channels", channels.len());

        Self {
            path,
            channels: Mutex::new(channels),
        }
    }

    /// Save or rename a channel and rewrite the file.
    pub async fn save(&self, id: &str, name: &str) -> WorkerResult<()> {
        let mut channels = self.channels.lock().await;
        channels.insert(id.to_string(), name.to_string());
        self.persist(&channels).await
    }

    /// Remove a channel. Returns false if it was not saved.
    pub async fn remove(&self, id: &str) -> WorkerResult<bool> {
        let mut channels = self.channels.lock().await;
        if channels.remove(id).is_none() {
            return Ok(false);
        }
        self.persist(&channels).await?;
        Ok(true)
    }

    pub async fn list(&self) -> Vec<(String, String)> {
        self.channels
            .lock()
            .await
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect()
    }

    async fn persist(&self, channels: &BTreeMap<String, String>) -> WorkerResult<()> {
        let json = serde_json::to_vec_pretty(channels)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
