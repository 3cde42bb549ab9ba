//! Trait seams over external tools so the pipeline can run against fakes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use relay_models::{Track, Variant};

use crate::cancel::CancelToken;
use crate::download::HttpDownloader;
use crate::error::MediaResult;
use crate::extractor::{ExtractedInfo, Extractor};
use crate::probe::{self, ProbeReport};
use crate::remux::{self, StreamMap};
use crate::thumbnail;

/// Wall-clock limits for each tool invocation, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolTimeouts {
    pub probe_secs: u64,
    pub remux_secs: u64,
    pub thumbnail_secs: u64,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            probe_secs: 60,
            remux_secs: 3600,
            thumbnail_secs: 60,
        }
    }
}

/// Local media transforms: probing, remuxing and frame extraction.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Duration and dimensions; never fails, zero-valued on total failure.
    async fn probe(&self, path: &Path) -> ProbeReport;

    /// Audio streams in container order.
    async fn audio_tracks(&self, path: &Path) -> MediaResult<Vec<Track>>;

    /// Lower-cased audio codec names.
    async fn audio_codecs(&self, path: &Path) -> MediaResult<Vec<String>>;

    /// Copy remux retitling audio and clearing the handler name.
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        audio_title: &str,
        cancel: &CancelToken,
    ) -> MediaResult<()>;

    /// Copy remux keeping only the mapped audio streams.
    async fn reorder_audio(
        &self,
        input: &Path,
        output: &Path,
        map: &StreamMap,
        audio_title: &str,
        cancel: &CancelToken,
    ) -> MediaResult<()>;

    /// Single frame at `offset_secs`.
    async fn thumbnail(
        &self,
        video: &Path,
        output: &Path,
        offset_secs: u64,
        cancel: &CancelToken,
    ) -> MediaResult<()>;
}

/// Remote acquisition: plain HTTP, cloud drive and the site extractor.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn fetch_url(&self, url: &str, dest: &Path, cancel: &CancelToken) -> MediaResult<u64>;

    async fn fetch_drive(&self, file_id: &str, dest: &Path, cancel: &CancelToken) -> MediaResult<u64>;

    async fn list_variants(&self, url: &str, cancel: &CancelToken) -> MediaResult<ExtractedInfo>;

    async fn download_variant(
        &self,
        url: &str,
        variant: &Variant,
        dir: &Path,
        stem: &str,
        cancel: &CancelToken,
    ) -> MediaResult<PathBuf>;

    fn extractor_available(&self) -> bool;
}

/// [`MediaTools`] backed by ffmpeg, ffprobe and mediainfo.
#[derive(Debug, Clone, Default)]
pub struct SystemTools {
    timeouts: ToolTimeouts,
}

impl SystemTools {
    pub fn new(timeouts: ToolTimeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl MediaTools for SystemTools {
    async fn probe(&self, path: &Path) -> ProbeReport {
        probe::probe_with_fallback(path, self.timeouts.probe_secs).await
    }

    async fn audio_tracks(&self, path: &Path) -> MediaResult<Vec<Track>> {
        probe::list_audio_tracks(path, self.timeouts.probe_secs).await
    }

    async fn audio_codecs(&self, path: &Path) -> MediaResult<Vec<String>> {
        probe::audio_codecs(path, self.timeouts.probe_secs).await
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        audio_title: &str,
        cancel: &CancelToken,
    ) -> MediaResult<()> {
        remux::normalize(input, output, audio_title, self.timeouts.remux_secs, cancel).await
    }

    async fn reorder_audio(
        &self,
        input: &Path,
        output: &Path,
        map: &StreamMap,
        audio_title: &str,
        cancel: &CancelToken,
    ) -> MediaResult<()> {
        remux::reorder_audio(input, output, map, audio_title, self.timeouts.remux_secs, cancel)
            .await
    }

    async fn thumbnail(
        &self,
        video: &Path,
        output: &Path,
        offset_secs: u64,
        cancel: &CancelToken,
    ) -> MediaResult<()> {
        thumbnail::generate_thumbnail(
            video,
            output,
            offset_secs,
            self.timeouts.thumbnail_secs,
            cancel,
        )
        .await
    }
}

/// [`RemoteFetch`] backed by reqwest and yt-dlp.
#[derive(Debug, Clone)]
pub struct WebFetcher {
    http: HttpDownloader,
    extractor: Extractor,
}

impl WebFetcher {
    pub fn new(http: HttpDownloader, extractor: Extractor) -> Self {
        Self { http, extractor }
    }
}

#[async_trait]
impl RemoteFetch for WebFetcher {
    async fn fetch_url(&self, url: &str, dest: &Path, cancel: &CancelToken) -> MediaResult<u64> {
        self.http.download(url, dest, cancel).await
    }

    async fn fetch_drive(&self, file_id: &str, dest: &Path, cancel: &CancelToken) -> MediaResult<u64> {
        self.http.download_drive(file_id, dest, cancel).await
    }

    async fn list_variants(&self, url: &str, cancel: &CancelToken) -> MediaResult<ExtractedInfo> {
        self.extractor.list_variants(url, cancel).await
    }

    async fn download_variant(
        &self,
        url: &str,
        variant: &Variant,
        dir: &Path,
        stem: &str,
        cancel: &CancelToken,
    ) -> MediaResult<PathBuf> {
        self.extractor.download(url, variant, dir, stem, cancel).await
    }

    fn extractor_available(&self) -> bool {
        self.extractor.is_available()
    }
}
