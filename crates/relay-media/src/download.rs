//! Streaming HTTP downloads with a size ceiling and cooperative cancellation.
//!
//! Plain URLs are streamed straight to disk. Cloud-drive links go through the
//! confirmation dance: when the first response is an interstitial page rather
//! than the file, a confirm token is scraped from the body or from a
//! `download_warning*` cookie and the request is retried with it.

use futures::StreamExt;
use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, COOKIE, SET_COOKIE};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{MediaError, MediaResult};

/// User agent sent with every download request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64)";

/// Direct-download endpoint for cloud-drive files.
pub const DRIVE_DOWNLOAD_BASE: &str = "https://drive.google.com/uc";

/// Hard ceiling on a single download (4 GiB).
pub const DEFAULT_MAX_BYTES: u64 = 4 * 1024 * 1024 * 1024;

static CONFIRM_TOKEN: OnceLock<Regex> = OnceLock::new();
static DRIVE_ID_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn confirm_token_regex() -> &'static Regex {
    CONFIRM_TOKEN.get_or_init(|| Regex::new(r"confirm=([0-9A-Za-z_-]+)").expect("valid regex"))
}

fn drive_id_patterns() -> &'static [Regex] {
    DRIVE_ID_PATTERNS.get_or_init(|| {
        [r"/d/([a-zA-Z0-9_-]+)", r"id=([a-zA-Z0-9_-]+)"]
            .iter()
            .map(|p| Regex::new(p).expect("valid regex"))
            .collect()
    })
}

/// Whether a URL points at a cloud-drive share.
pub fn is_drive_url(url: &str) -> bool {
    url.contains("drive.google.com") || url.contains("docs.google.com")
}

/// Extract the file id from a cloud-drive share URL.
pub fn extract_drive_id(url: &str) -> Option<String> {
    drive_id_patterns()
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Confirm token embedded in an interstitial page body.
pub fn confirm_token_from_body(body: &str) -> Option<String> {
    confirm_token_regex()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `(cookie name, token)` from a `download_warning*` cookie.
pub fn confirm_token_from_cookies(headers: &reqwest::header::HeaderMap) -> Option<(String, String)> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| {
            let pair = cookie.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            name.starts_with("download_warning")
                .then(|| (name.to_string(), value.to_string()))
        })
        .next()
}

/// HTTP downloader enforcing a byte ceiling.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    max_bytes: u64,
    drive_base: String,
}

impl HttpDownloader {
    /// Create a downloader with a total per-request timeout.
    pub fn new(max_bytes: u64, timeout: Duration) -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            max_bytes,
            drive_base: DRIVE_DOWNLOAD_BASE.to_string(),
        })
    }

    /// Override the drive endpoint.
    pub fn with_drive_base(mut self, base: impl Into<String>) -> Self {
        self.drive_base = base.into();
        self
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Stream `url` into `dest`. Partial data is removed on any failure.
    pub async fn download(&self, url: &str, dest: &Path, cancel: &CancelToken) -> MediaResult<u64> {
        cancel.check()?;
        info!(url = %url, output = %dest.display(), "Starting HTTP download");

        let response = self.client.get(url).send().await?;
        let response = require_ok(response)?;
        self.stream_to_file(response, dest, cancel).await
    }

    /// Download a cloud-drive file by id.
    pub async fn download_drive(
        &self,
        file_id: &str,
        dest: &Path,
        cancel: &CancelToken,
    ) -> MediaResult<u64> {
        cancel.check()?;
        let url = format!("{}?export=download&id={}", self.drive_base, file_id);
        info!(file_id, output = %dest.display(), "Starting drive download");

        let response = self.client.get(&url).send().await?;
        if response.status().is_success() && response.headers().contains_key(CONTENT_DISPOSITION) {
            return self.stream_to_file(response, dest, cancel).await;
        }

        let cookie = confirm_token_from_cookies(response.headers());
        let body = response.text().await.unwrap_or_default();
        cancel.check()?;

        let (token, cookie_header) = match (confirm_token_from_body(&body), cookie) {
            (Some(token), cookie) => (token, cookie.map(|(name, value)| format!("{}={}", name, value))),
            (None, Some((name, value))) => {
                let header = format!("{}={}", name, value);
                (value, Some(header))
            }
            (None, None) => {
                warn!(file_id, "Drive confirmation token not found");
                return Err(MediaError::download_failed(
                    "drive file requires permission or the link is not public",
                ));
            }
        };

        debug!(file_id, "Retrying drive download with confirm token");
        let confirm_url = format!(
            "{}?export=download&confirm={}&id={}",
            self.drive_base, token, file_id
        );
        let mut request = self.client.get(&confirm_url);
        if let Some(cookie) = cookie_header {
            request = request.header(COOKIE, cookie);
        }
        let response = require_ok(request.send().await?)?;
        self.stream_to_file(response, dest, cancel).await
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        dest: &Path,
        cancel: &CancelToken,
    ) -> MediaResult<u64> {
        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(MediaError::SizeLimitExceeded {
                    limit: self.max_bytes,
                });
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        let result: MediaResult<u64> = async {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(MediaError::Cancelled),
                    next = stream.next() => next,
                };
                let Some(chunk) = next else { break };
                let chunk = chunk?;
                written += chunk.len() as u64;
                if written > self.max_bytes {
                    return Err(MediaError::SizeLimitExceeded {
                        limit: self.max_bytes,
                    });
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(written)
        }
        .await;

        drop(file);
        match result {
            Ok(bytes) => {
                info!(output = %dest.display(), size_mb = bytes as f64 / (1024.0 * 1024.0), "Download complete");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(dest).await {
                    debug!(output = %dest.display(), error = %rm, "No partial file to remove");
                }
                Err(e)
            }
        }
    }
}

fn require_ok(response: reqwest::Response) -> MediaResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(MediaError::download_failed(format!("HTTP {}", status.as_u16())))
    }
}
