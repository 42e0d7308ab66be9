//! Enable the virtual TPM when requested. Requires EFI firmware, which the
//! configuration check enforces before the build starts.

use async_trait::async_trait;

use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct TpmStep;

#[async_trait]
impl Step for TpmStep {
    fn name(&self) -> &'static str {
        "configure-tpm"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        if !ctx.options.hardware.vtpm {
            return Ok(StepAction::Continue);
        }
        let vm = state.vm()?;
        tracing::info!("enabling virtual TPM");
        vm.set_tpm(true).await?;
        Ok(StepAction::Continue)
    }
}
