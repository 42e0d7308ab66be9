//! Boot delay and EFI secure boot, written before first power-on.

use async_trait::async_trait;

use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct BootOptionsStep;

#[async_trait]
impl Step for BootOptionsStep {
    fn name(&self) -> &'static str {
        "configure-boot-options"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let hardware = &ctx.options.hardware;
        let secure_boot = hardware.firmware.secure_boot();
        if hardware.boot_delay == 0 && !secure_boot {
            return Ok(StepAction::Continue);
        }

        let vm = state.vm()?;
        let delay_ms = hardware.boot_delay * 1000;
        tracing::info!(boot_delay_ms = delay_ms, secure_boot, "configuring boot options");
        vm.set_boot_options(delay_ms, secure_boot).await?;
        Ok(StepAction::Continue)
    }
}
