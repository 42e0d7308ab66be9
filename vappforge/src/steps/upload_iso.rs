//! Upload the staged image into the catalog and wait for it to settle.

use std::time::Duration;

use async_trait::async_trait;

use crate::driver::types::MEDIA_STATUS_RESOLVED;
use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

/// How long a fresh media object gets to reach RESOLVED.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(10);
const STATUS_POLL_LIMIT: u32 = 30;

pub struct UploadIsoStep;

/// Media name for the staged image. A mutated image carries a short digest
/// tag so cached copies don't collide when the injected content changes
/// between builds.
pub fn media_name(state: &BuildState) -> ForgeResult<String> {
    let path = state.iso_path()?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ForgeError::Internal(format!("bad image path {}", path.display())))?;

    if !state.iso_modified {
        return Ok(name);
    }
    let Some(checksum) = &state.iso_checksum else {
        return Ok(name);
    };
    let Some(hex) = checksum.strip_prefix("sha256:").filter(|h| h.len() >= 8) else {
        return Ok(name);
    };
    let tag = &hex[..8];
    Ok(match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{tag}.{ext}"),
        None => format!("{name}-{tag}"),
    })
}

#[async_trait]
impl Step for UploadIsoStep {
    fn name(&self) -> &'static str {
        "upload-iso"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let driver = state.driver()?;
        let catalog = state.catalog()?.clone();
        let name = media_name(state)?;
        let iso_path = state.iso_path()?.clone();
        let image = &ctx.options.image;

        if image.cache_iso || image.cache_overwrite {
            if let Some(existing) = driver.get_media(&catalog, &name).await? {
                if image.cache_overwrite {
                    tracing::info!(media = %existing, "overwriting cached image in catalog");
                    driver.delete_media(&catalog, &name).await?;
                } else {
                    tracing::info!(media = %name, "image already in catalog; skipping upload");
                    state.uploaded_media_name = Some(name);
                    state.media_was_uploaded = false;
                    return Ok(StepAction::Continue);
                }
            }
        }

        tracing::info!(catalog = %catalog.name, media = %name, "uploading image");
        driver
            .upload_media(&catalog, &name, "Installer image upload", &iso_path)
            .await?;

        // The upload task finishing does not mean the object is usable yet;
        // wait for the RESOLVED sentinel.
        let mut polls = 0;
        loop {
            let status = driver.media_status(&catalog, &name).await?;
            if status == MEDIA_STATUS_RESOLVED {
                break;
            }
            polls += 1;
            if polls >= STATUS_POLL_LIMIT {
                return Err(ForgeError::Timeout(format!(
                    "waiting for media {name} to resolve (status {status})"
                )));
            }
            tracing::debug!(media = %name, status, "media not resolved yet");
            ctx.cancel.sleep(STATUS_POLL_INTERVAL).await?;
        }

        tracing::info!(media = %name, "image uploaded and resolved");
        state.uploaded_media_name = Some(name);
        state.media_was_uploaded = true;
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, state: &mut BuildState) {
        // A temporary catalog is deleted wholesale by the catalog stage, and
        // cached images in persistent catalogs are left for future builds.
        if state.temp_catalog || !state.media_was_uploaded {
            return;
        }
        if state.aborted() {
            if let Some(name) = &state.uploaded_media_name {
                tracing::info!(media = %name, "build aborted; uploaded image remains in catalog");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_name_is_the_file_name_for_pristine_images() {
        let mut state = BuildState::new();
        state.iso_path = Some("/cache/debian-12.iso".into());
        assert_eq!(media_name(&state).unwrap(), "debian-12.iso");
    }

    #[test]
    fn media_name_carries_a_digest_tag_after_mutation() {
        let mut state = BuildState::new();
        state.iso_path = Some("/tmp/debian-12-modified.iso".into());
        state.iso_modified = true;
        state.iso_checksum = Some("sha256:deadbeefcafe0123".into());
        assert_eq!(
            media_name(&state).unwrap(),
            "debian-12-modified-deadbeef.iso"
        );
    }

    #[test]
    fn media_name_survives_a_missing_checksum() {
        let mut state = BuildState::new();
        state.iso_path = Some("/tmp/x.iso".into());
        state.iso_modified = true;
        assert_eq!(media_name(&state).unwrap(), "x.iso");
    }
}
