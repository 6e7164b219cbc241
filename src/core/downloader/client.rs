use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::error::{PanelError, PanelResult};
use crate::core::http::build_http_client;

/// Progress of one streaming download.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DownloadProgress {
    pub url: String,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub file_name: String,
}

/// Receives progress updates; called from the downloading task.
pub type ProgressSink = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Progress is only reported every this many bytes (and at the end).
const PROGRESS_STEP: u64 = 64 * 1024;

/// Streaming downloader shared by module installs and runtime provisioning.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> PanelResult<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    // ── Asset discovery ─────────────────────────────────

    /// HEAD each candidate in order and return the first answering 2xx.
    #[instrument(skip(self, candidates))]
    pub async fn probe_first_available(
        &self,
        label: &str,
        candidates: &[String],
    ) -> PanelResult<String> {
        for url in candidates {
            match self.client.head(url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Asset available: {}", url);
                    return Ok(url.clone());
                }
                Ok(response) => debug!("Asset probe {} -> {}", url, response.status()),
                Err(err) => debug!("Asset probe {} failed: {}", url, err),
            }
        }
        Err(PanelError::AssetNotFound {
            version: label.to_string(),
            tried: candidates.to_vec(),
        })
    }

    // ── Single file download ────────────────────────────

    /// Stream `url` into `dest`, reporting progress and honoring `cancel`.
    ///
    /// On any failure, including cancellation, the partial file is removed.
    /// Returns the number of bytes written.
    #[instrument(skip(self, progress, cancel))]
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PanelError::io(parent, source))?;
        }

        let result = self.stream_to_file(url, dest, progress, cancel).await;
        if result.is_err() {
            if let Err(err) = tokio::fs::remove_file(dest).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove partial download {:?}: {}", dest, err);
                }
            }
        }
        result
    }

    async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<u64> {
        if cancel.is_cancelled() {
            return Err(PanelError::Cancelled);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(PanelError::Cancelled),
            response = self.client.get(url).send() => response?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(PanelError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length();
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let report = |bytes_downloaded: u64| {
            if let Some(sink) = &progress {
                sink(DownloadProgress {
                    url: url.to_string(),
                    bytes_downloaded,
                    total_bytes,
                    file_name: file_name.clone(),
                });
            }
        };

        let mut downloaded = 0u64;
        let mut last_reported = 0u64;
        // Scoped so the handle is closed before the caller touches the file.
        {
            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|source| PanelError::io(dest, source))?;
            let mut stream = response.bytes_stream();
            report(0);

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Download of {} cancelled after {} bytes", url, downloaded);
                        return Err(PanelError::Cancelled);
                    }
                    chunk = stream.next() => chunk,
                };
                let Some(chunk) = chunk else { break };
                let chunk = chunk?;
                file.write_all(&chunk)
                    .await
                    .map_err(|source| PanelError::io(dest, source))?;
                downloaded += chunk.len() as u64;
                if downloaded - last_reported >= PROGRESS_STEP {
                    last_reported = downloaded;
                    report(downloaded);
                }
            }

            file.flush()
                .await
                .map_err(|source| PanelError::io(dest, source))?;
        }

        report(downloaded);
        debug!("Downloaded: {} -> {:?} ({} bytes)", url, dest, downloaded);
        Ok(downloaded)
    }

    /// Download and verify against an expected SHA-256 (hex, any case).
    pub async fn download_verified(
        &self,
        url: &str,
        dest: &Path,
        sha256_expected: Option<&str>,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<u64> {
        let written = self.download_file(url, dest, progress, cancel).await?;
        if let Some(expected) = sha256_expected {
            let actual = sha256_file(dest).await?;
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                let _ = tokio::fs::remove_file(dest).await;
                return Err(PanelError::Sha256Mismatch {
                    path: dest.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(written)
    }
}

/// Lowercase hex SHA-256 of a file.
pub async fn sha256_file(path: &Path) -> PanelResult<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file_blocking(&path))
        .await
        .map_err(|err| PanelError::Other(format!("hash task failed: {err}")))?
}

pub fn sha256_file_blocking(path: &Path) -> PanelResult<String> {
    let mut file = std::fs::File::open(path).map_err(|source| PanelError::io(path, source))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| PanelError::io(path, source))?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
