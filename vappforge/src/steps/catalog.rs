//! Create or reuse the staging catalog.
//!
//! A caller-named catalog is referenced and never deleted. Otherwise a
//! temporary catalog is created, named with the configured prefix plus a
//! nanosecond timestamp, backed by the datacenter's first storage profile so
//! media in it is reachable from the hosts that will mount it. The
//! temporary catalog is deleted on every exit path.

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct CatalogStep;

#[async_trait]
impl Step for CatalogStep {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let driver = state.driver()?;

        // Later stages need the datacenter handle regardless of which
        // catalog path is taken.
        let vdc = driver.get_vdc(&ctx.options.location.vdc).await?;

        let image = &ctx.options.image;
        if !image.iso_catalog.is_empty() {
            tracing::info!(catalog = %image.iso_catalog, "using existing image catalog");
            let catalog = driver.get_catalog(&image.iso_catalog).await?;
            state.catalog = Some(catalog);
            state.catalog_name = Some(image.iso_catalog.clone());
            state.temp_catalog = false;
            state.vdc = Some(vdc);
            return Ok(StepAction::Continue);
        }

        let name = format!(
            "{}{}",
            image.temp_catalog_prefix,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        tracing::info!(catalog = %name, "creating temporary catalog");

        let storage_profile = if !ctx.options.location.storage_profile.is_empty() {
            Some(
                driver
                    .find_storage_profile(&vdc, &ctx.options.location.storage_profile)
                    .await?,
            )
        } else {
            vdc.storage_profiles.first().cloned()
        };
        if let Some(profile) = &storage_profile {
            tracing::info!(storage_profile = %profile.name, "catalog storage profile");
        }

        let catalog = driver
            .create_catalog(&name, "Temporary catalog for image build", storage_profile.as_ref())
            .await?;

        state.catalog = Some(catalog);
        state.catalog_name = Some(name);
        state.temp_catalog = true;
        state.vdc = Some(vdc);
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, state: &mut BuildState) {
        if !state.temp_catalog {
            return;
        }
        let (Some(driver), Some(catalog)) = (&state.driver, &state.catalog) else {
            return;
        };
        tracing::info!(catalog = %catalog.name, "deleting temporary catalog");
        if let Err(e) = driver.delete_catalog(catalog).await {
            tracing::warn!(error = %e, "failed to delete temporary catalog");
        }
    }
}
