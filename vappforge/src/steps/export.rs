//! Capture the powered-off VM as a vApp template.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::driver::types::TEMPLATE_STATUS_READY;
use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_secs(10);
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct ExportStep;

#[async_trait]
impl Step for ExportStep {
    fn name(&self) -> &'static str {
        "export-to-catalog"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let Some(export) = &ctx.options.export else {
            tracing::info!("no export configured; leaving the VM in place");
            return Ok(StepAction::Continue);
        };
        let driver = state.driver()?;
        let vapp = state.vapp()?.clone();
        let template_name = ctx
            .options
            .template_name()
            .unwrap_or_else(|| ctx.options.location.vm_name.clone());

        // Media must be out of the drive before capture.
        if state.iso_mounted {
            let vm = state.vm()?;
            if let (Some(catalog_name), Some(media_name)) =
                (&state.catalog_name, &state.uploaded_media_name)
            {
                tracing::info!(media = %media_name, "ejecting image before capture");
                vm.eject_media(catalog_name, media_name).await?;
                state.iso_mounted = false;
            }
        }

        let catalog = match driver.get_catalog(&export.catalog).await {
            Ok(catalog) => catalog,
            Err(_) if export.create_catalog => {
                tracing::info!(catalog = %export.catalog, "creating export catalog");
                driver
                    .create_catalog(&export.catalog, &export.description, None)
                    .await?
            }
            Err(e) => return Err(e),
        };

        if driver
            .get_catalog_item(&catalog, &template_name)
            .await?
            .is_some()
        {
            if !export.overwrite {
                return Err(ForgeError::Conflict(format!(
                    "template {template_name} already exists in catalog {}; \
                     set overwrite to replace it",
                    catalog.name
                )));
            }
            tracing::info!(template = %template_name, "deleting existing template");
            driver.delete_catalog_item(&catalog, &template_name).await?;

            let deadline = Instant::now() + DELETE_TIMEOUT;
            while driver
                .get_catalog_item(&catalog, &template_name)
                .await?
                .is_some()
            {
                if Instant::now() > deadline {
                    return Err(ForgeError::Timeout(format!(
                        "waiting for template {template_name} to be deleted"
                    )));
                }
                ctx.cancel.sleep(DELETE_POLL_INTERVAL).await?;
            }
        }

        tracing::info!(
            template = %template_name,
            catalog = %catalog.name,
            "capturing vApp as template"
        );
        driver
            .capture_template(&catalog, &vapp, &template_name, &export.description)
            .await?;

        let deadline = Instant::now() + CAPTURE_TIMEOUT;
        loop {
            let status = driver.template_status(&catalog, &template_name).await?;
            if status == TEMPLATE_STATUS_READY {
                break;
            }
            if Instant::now() > deadline {
                return Err(ForgeError::Timeout(format!(
                    "waiting for template {template_name} to resolve (status {status})"
                )));
            }
            tracing::debug!(template = %template_name, status, "capture in progress");
            ctx.cancel.sleep(CAPTURE_POLL_INTERVAL).await?;
        }

        tracing::info!(template = %template_name, "template ready");
        state.template_name = Some(template_name);
        Ok(StepAction::Continue)
    }
}
