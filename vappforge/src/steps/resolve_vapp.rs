//! Resolve or create the vApp the VM is built in.

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct ResolveVappStep;

#[async_trait]
impl Step for ResolveVappStep {
    fn name(&self) -> &'static str {
        "resolve-vapp"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let driver = state.driver()?;
        let vdc = state.vdc()?.clone();
        let location = &ctx.options.location;

        if !location.vapp.is_empty() {
            if let Some(vapp) = driver.get_vapp(&vdc, &location.vapp).await? {
                tracing::info!(vapp = %vapp.name, "using existing vApp");
                state.vapp = Some(vapp);
                state.vapp_created = false;
                return Ok(StepAction::Continue);
            }
            if !location.create_vapp {
                return Err(ForgeError::Config(format!(
                    "vApp {} not found and create_vapp is false",
                    location.vapp
                )));
            }
        }

        let name = if location.vapp.is_empty() {
            format!(
                "{}{}",
                location.vapp_prefix,
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            )
        } else {
            location.vapp.clone()
        };

        let network = &ctx.options.network.network;
        tracing::info!(vapp = %name, "creating vApp");
        let vapp = driver
            .create_vapp(
                &vdc,
                &name,
                "vappforge build",
                (!network.is_empty()).then_some(network.as_str()),
            )
            .await?;

        state.vapp = Some(vapp);
        state.vapp_created = true;
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, state: &mut BuildState) {
        // A vApp this build created is only rolled back on abort; on success
        // it carries the captured VM.
        if !state.vapp_created || !state.aborted() {
            return;
        }
        let (Some(driver), Some(vapp)) = (&state.driver, &state.vapp) else {
            return;
        };
        tracing::info!(vapp = %vapp.name, "deleting vApp");
        if let Err(e) = driver.delete_vapp(vapp).await {
            tracing::warn!(error = %e, "failed to delete vApp");
        }
    }
}
