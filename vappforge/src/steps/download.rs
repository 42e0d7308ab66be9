//! Stage the installer image locally.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

#[derive(Default)]
pub struct DownloadStep {
    /// Path this step materialized, if the fetch actually downloaded.
    downloaded_path: Option<PathBuf>,
}

#[async_trait]
impl Step for DownloadStep {
    fn name(&self) -> &'static str {
        "download-image"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let image = &ctx.options.image;
        let cache_dir = image
            .cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("vappforge-cache"));

        let fetched = ctx
            .fetcher
            .fetch(&image.iso_url, &image.iso_checksum, &cache_dir, &ctx.cancel)
            .await?;

        tracing::info!(path = %fetched.path.display(), "installer image staged");
        if fetched.downloaded {
            self.downloaded_path = Some(fetched.path.clone());
        }
        state.iso_path = Some(fetched.path);
        state.iso_downloaded = fetched.downloaded;
        if !image.iso_checksum.is_empty() {
            state.iso_checksum = Some(image.iso_checksum.clone());
        }
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, state: &mut BuildState) {
        // The cached image is kept on a clean exit for the next build; an
        // aborted build removes what it downloaded.
        if !state.aborted() {
            return;
        }
        if let Some(path) = &self.downloaded_path {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove image");
                }
            }
        }
    }
}
