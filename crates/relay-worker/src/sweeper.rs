//! Background removal of stale files from the work directory.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Delete regular files directly inside `dir` last modified more than
/// `retention` ago. Subdirectories are left alone. Returns the count removed.
pub async fn sweep_once(dir: &Path, retention: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age <= retention {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to sweep {}: {}", entry.path().display(), e),
        }
    }
    Ok(removed)
}

/// Sweep every `interval` until `shutdown` flips to true.
pub async fn run_sweeper(
    dir: impl AsRef<Path>,
    retention: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let dir = dir.as_ref();
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match sweep_once(dir, retention).await {
                    Ok(0) => debug!("Sweep found nothing to remove"),
                    Ok(n) => info!("Swept {} stale files from {}", n, dir.display()),
                    Err(e) => warn!("Sweep of {} failed: {}", dir.display(), e),
                }
            }
        }
    }
}
