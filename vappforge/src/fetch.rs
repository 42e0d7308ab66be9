//! Installer-image acquisition.
//!
//! The downloader resolves an image URL plus checksum to a local path. HTTP
//! sources stream into a cache directory keyed by checksum so repeated
//! builds reuse the download; `file://` URLs and bare paths pass through.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::cancel::CancelToken;

/// The outcome of fetching: where the image is, and whether this build
/// materialized it (and therefore may delete it on abort).
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub path: PathBuf,
    pub downloaded: bool,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Resolve `url` to a local file, verifying `checksum` (`sha256:<hex>`,
    /// empty to skip verification).
    async fn fetch(
        &self,
        url: &str,
        checksum: &str,
        cache_dir: &Path,
        cancel: &CancelToken,
    ) -> ForgeResult<FetchedImage>;
}

/// Streams HTTP(S) sources with SHA-256 verification; local paths and
/// `file://` URLs are used in place.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> HttpFetcher {
        HttpFetcher {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        HttpFetcher::new()
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        checksum: &str,
        cache_dir: &Path,
        cancel: &CancelToken,
    ) -> ForgeResult<FetchedImage> {
        if let Some(path) = local_path(url) {
            if !path.is_file() {
                return Err(ForgeError::Config(format!(
                    "iso_url {} does not exist",
                    path.display()
                )));
            }
            if let Some(expected) = checksum_hex(checksum)? {
                verify(&path, &expected)?;
            }
            return Ok(FetchedImage {
                path,
                downloaded: false,
            });
        }

        let expected = checksum_hex(checksum)?;
        tokio::fs::create_dir_all(cache_dir).await.map_err(|e| {
            ForgeError::Config(format!("failed to create {}: {e}", cache_dir.display()))
        })?;

        let file_name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("installer.iso");
        let target = match &expected {
            Some(digest) => cache_dir.join(format!("{}-{file_name}", &digest[..12.min(digest.len())])),
            None => cache_dir.join(file_name),
        };

        if target.is_file() {
            if let Some(expected) = &expected {
                if verify(&target, expected).is_ok() {
                    tracing::info!(path = %target.display(), "using cached image");
                    return Ok(FetchedImage {
                        path: target,
                        downloaded: false,
                    });
                }
                tracing::warn!(path = %target.display(), "cached image fails checksum; refetching");
            }
        }

        tracing::info!(url, "downloading installer image");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ForgeError::Config(format!("failed to download {url}: {e}")))?;

        let partial = target.with_extension("partial");
        let mut file = tokio::fs::File::create(&partial).await.map_err(|e| {
            ForgeError::Config(format!("failed to create {}: {e}", partial.display()))
        })?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            cancel.check()?;
            let chunk =
                chunk.map_err(|e| ForgeError::Config(format!("download of {url} failed: {e}")))?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = &expected {
            if &actual != expected {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(ForgeError::Config(format!(
                    "checksum mismatch for {url}: expected sha256:{expected}, got sha256:{actual}"
                )));
            }
        }
        tokio::fs::rename(&partial, &target).await?;

        Ok(FetchedImage {
            path: target,
            downloaded: true,
        })
    }
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if !url.contains("://") {
        return Some(PathBuf::from(url));
    }
    None
}

/// Split a `sha256:<hex>` checksum option; empty means no verification.
fn checksum_hex(checksum: &str) -> ForgeResult<Option<String>> {
    if checksum.is_empty() || checksum == "none" {
        return Ok(None);
    }
    match checksum.split_once(':') {
        Some(("sha256", hex)) if !hex.is_empty() => Ok(Some(hex.to_ascii_lowercase())),
        _ => Err(ForgeError::Config(format!(
            "unsupported iso_checksum {checksum:?}; expected sha256:<hex>"
        ))),
    }
}

fn verify(path: &Path, expected: &str) -> ForgeResult<()> {
    let actual = crate::iso::checksum_file(path)?;
    if actual == expected {
        Ok(())
    } else {
        Err(ForgeError::Config(format!(
            "checksum mismatch for {}: expected sha256:{expected}, got sha256:{actual}",
            path.display()
        )))
    }
}
