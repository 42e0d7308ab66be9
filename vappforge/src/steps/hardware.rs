//! Shape CPU and memory, or assign a sizing policy.

use async_trait::async_trait;

use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct HardwareStep;

#[async_trait]
impl Step for HardwareStep {
    fn name(&self) -> &'static str {
        "configure-hardware"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let vm = state.vm()?;
        let hardware = &ctx.options.hardware;

        if !hardware.vm_sizing_policy.is_empty() {
            let driver = state.driver()?;
            let vdc = state.vdc()?;
            tracing::info!(policy = %hardware.vm_sizing_policy, "applying sizing policy");
            let policy = driver
                .find_sizing_policy(vdc, &hardware.vm_sizing_policy)
                .await?;
            vm.apply_sizing_policy(&policy).await?;
        } else {
            if hardware.cpus > 0 {
                let cores = hardware.cores_per_socket.max(1);
                tracing::info!(cpus = hardware.cpus, cores_per_socket = cores, "configuring CPU");
                vm.change_cpu(hardware.cpus, cores).await?;
            }
            if hardware.memory > 0 {
                tracing::info!(memory_mb = hardware.memory, "configuring memory");
                vm.change_memory(hardware.memory).await?;
            }
        }

        vm.refresh().await?;
        Ok(StepAction::Continue)
    }
}
