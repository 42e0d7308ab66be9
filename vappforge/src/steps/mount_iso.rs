//! Attach the uploaded image to the VM's optical slot.

use async_trait::async_trait;

use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::{retry, BuildContext, BuildState, Step, StepAction};

pub struct MountIsoStep;

#[async_trait]
impl Step for MountIsoStep {
    fn name(&self) -> &'static str {
        "mount-iso"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let vm = state.vm()?;
        let catalog_name = state
            .catalog_name
            .clone()
            .ok_or_else(|| ForgeError::Internal("catalog_name not in build state".into()))?;
        let media_name = state
            .uploaded_media_name
            .clone()
            .ok_or_else(|| ForgeError::Internal("uploaded_media_name not in build state".into()))?;

        tracing::info!(media = %media_name, catalog = %catalog_name, "mounting image");

        // A freshly resolved media object can still refuse inserts for a
        // while; those come back as 409 and are worth waiting out.
        retry::MEDIA_INSERT
            .run(
                &ctx.cancel,
                |_| {
                    let vm = vm.clone();
                    let catalog_name = catalog_name.clone();
                    let media_name = media_name.clone();
                    async move { vm.insert_media(&catalog_name, &media_name).await }
                },
                ForgeError::is_media_busy,
            )
            .await?;

        state.iso_mounted = true;
        tracing::info!("image mounted");
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, state: &mut BuildState) {
        if !state.iso_mounted {
            return;
        }
        let Some(vm) = &state.vm else {
            return;
        };
        let (Some(catalog_name), Some(media_name)) =
            (&state.catalog_name, &state.uploaded_media_name)
        else {
            return;
        };
        tracing::info!(media = %media_name, "ejecting image");
        if let Err(e) = vm.eject_media(catalog_name, media_name).await {
            tracing::warn!(error = %e, "failed to eject image");
        } else {
            state.iso_mounted = false;
        }
    }
}
