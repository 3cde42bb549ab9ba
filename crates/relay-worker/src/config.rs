//! Relay configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use relay_media::{ToolTimeouts, DEFAULT_MAX_BYTES};

/// Default brand used for upload names and audio track titles.
pub const DEFAULT_BRAND_NAME: &str = "[@TA_HD_Anime] Telegram Channel";

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Work directory for downloaded and intermediate files
    pub work_dir: PathBuf,
    /// Hard ceiling for a single acquired file
    pub max_file_bytes: u64,
    /// Upload attempts before giving up
    pub upload_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * unit`
    pub upload_backoff_unit: Duration,
    /// Thumbnail frame offset when the user has not chosen one
    pub default_thumbnail_offset_secs: u64,
    /// Brand used for renamed uploads and audio track titles
    pub brand_name: String,
    /// Per-tool timeouts for ffprobe, ffmpeg and mediainfo
    pub tool_timeouts: ToolTimeouts,
    /// Timeout for yt-dlp invocations
    pub extractor_timeout: Duration,
    /// Total timeout for one HTTP download
    pub http_timeout: Duration,
    /// Pause between items of a caption batch
    pub batch_pacing: Duration,
    /// Saved channels JSON file
    pub channels_file: PathBuf,
    /// Age after which files in the work directory are swept
    pub temp_retention: Duration,
    /// How often the sweeper runs
    pub sweep_interval: Duration,
    /// Prometheus exporter port, disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/mediarelay"),
            max_file_bytes: DEFAULT_MAX_BYTES,
            upload_attempts: 3,
            upload_backoff_unit: Duration::from_secs(2),
            default_thumbnail_offset_secs: 1,
            brand_name: DEFAULT_BRAND_NAME.to_string(),
            tool_timeouts: ToolTimeouts::default(),
            extractor_timeout: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(7200),
            batch_pacing: Duration::from_millis(500),
            channels_file: PathBuf::from("channels.json"),
            temp_retention: Duration::from_secs(3 * 24 * 3600),
            sweep_interval: Duration::from_secs(3600),
            metrics_port: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl RelayConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("RELAY_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_file_bytes: env_parse("RELAY_MAX_FILE_BYTES").unwrap_or(defaults.max_file_bytes),
            upload_attempts: env_parse::<u32>("RELAY_UPLOAD_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.upload_attempts),
            upload_backoff_unit: env_parse("RELAY_UPLOAD_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.upload_backoff_unit),
            default_thumbnail_offset_secs: env_parse("RELAY_THUMBNAIL_OFFSET_SECS")
                .unwrap_or(defaults.default_thumbnail_offset_secs),
            brand_name: std::env::var("RELAY_BRAND_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.brand_name),
            tool_timeouts: ToolTimeouts {
                probe_secs: env_parse("RELAY_PROBE_TIMEOUT_SECS")
                    .unwrap_or(defaults.tool_timeouts.probe_secs),
                remux_secs: env_parse("RELAY_REMUX_TIMEOUT_SECS")
                    .unwrap_or(defaults.tool_timeouts.remux_secs),
                thumbnail_secs: env_parse("RELAY_THUMBNAIL_TIMEOUT_SECS")
                    .unwrap_or(defaults.tool_timeouts.thumbnail_secs),
            },
            extractor_timeout: env_parse("RELAY_EXTRACTOR_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.extractor_timeout),
            http_timeout: env_parse("RELAY_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            batch_pacing: env_parse("RELAY_BATCH_PACING_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_pacing),
            channels_file: std::env::var("RELAY_CHANNELS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.channels_file),
            temp_retention: env_parse("RELAY_TEMP_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.temp_retention),
            sweep_interval: env_parse("RELAY_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            metrics_port: env_parse("RELAY_METRICS_PORT"),
        }
    }

    /// Config rooted at `work_dir` with instant retries, for tests and tooling.
    pub fn for_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            channels_file: work_dir.join("channels.json"),
            work_dir,
            upload_backoff_unit: Duration::ZERO,
            batch_pacing: Duration::ZERO,
            ..Self::default()
        }
    }
}
