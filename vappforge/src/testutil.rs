//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::fetch::{FetchedImage, ImageFetcher};
use crate::iso::rebuild::StubRebuilder;
use crate::options::BuildOptions;
use crate::pipeline::{BuildContext, CancelToken};

/// A fetcher that treats every URL as a local path.
pub struct PassthroughFetcher;

#[async_trait::async_trait]
impl ImageFetcher for PassthroughFetcher {
    async fn fetch(
        &self,
        url: &str,
        _checksum: &str,
        _cache_dir: &std::path::Path,
        _cancel: &CancelToken,
    ) -> crate::errors::ForgeResult<FetchedImage> {
        Ok(FetchedImage {
            path: url.into(),
            downloaded: false,
        })
    }
}

/// A context with default options and inert collaborators.
pub fn test_context() -> BuildContext {
    BuildContext {
        options: Arc::new(BuildOptions::default()),
        cancel: CancelToken::never(),
        fetcher: Arc::new(PassthroughFetcher),
        communicator: None,
        provisioners: Vec::new(),
        rebuilder: Arc::new(StubRebuilder::default()),
    }
}
