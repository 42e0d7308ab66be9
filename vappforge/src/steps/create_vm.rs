//! Create the empty VM with its initial hardware shape.

use async_trait::async_trait;

use crate::driver::types::{IpAllocationMode, VmNetworkSpec, VmSpec};
use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

/// Guest customization accepts at most this many characters of hostname.
const COMPUTER_NAME_MAX: usize = 15;

pub struct CreateVmStep;

#[async_trait]
impl Step for CreateVmStep {
    fn name(&self) -> &'static str {
        "create-vm"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let driver = state.driver()?;
        let vdc = state.vdc()?.clone();
        let vapp = state.vapp()?.clone();
        let options = &ctx.options;

        let storage_profile = if !options.location.storage_profile.is_empty() {
            Some(
                driver
                    .find_storage_profile(&vdc, &options.location.storage_profile)
                    .await?,
            )
        } else {
            None
        };

        let mut computer_name = options.location.vm_name.clone();
        computer_name.truncate(COMPUTER_NAME_MAX);

        let network = (!options.network.network.is_empty()).then(|| {
            let mode = options.network.ip_allocation_mode;
            let ip = (mode == IpAllocationMode::Manual)
                .then_some(state.vm_ip)
                .flatten();
            if let Some(ip) = ip {
                tracing::info!(ip = %ip, "assigning static address to the NIC");
            }
            VmNetworkSpec {
                network: options.network.network.clone(),
                allocation_mode: mode,
                ip,
                adapter_type: options.hardware.network_adapter_type.clone(),
            }
        });

        let spec = VmSpec {
            name: options.location.vm_name.clone(),
            description: "Built by vappforge".into(),
            computer_name,
            guest_os_type: options.hardware.guest_os_type.clone(),
            firmware: options.hardware.firmware.firmware(),
            hardware_version: options.hardware.hw_version.clone(),
            // Shaped to the caller's size by the hardware stage.
            cpus: 1,
            cores_per_socket: 1,
            memory_mb: 1024,
            disk_size_mb: options.hardware.disk_size,
            storage_profile,
            network,
        };

        tracing::info!(vm = %spec.name, firmware = spec.firmware.as_str(), "creating VM");
        let vm = driver.create_vm(&vapp, &spec).await?;
        state.vm = Some(vm);
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, state: &mut BuildState) {
        // Only roll back on abort; a successful build keeps the VM as the
        // template source.
        if !state.aborted() {
            return;
        }
        let Some(vm) = &state.vm else {
            return;
        };
        tracing::info!(vm = %vm.name(), "deleting VM");
        if let Ok(true) = vm.is_powered_on().await {
            if let Err(e) = vm.power_off().await {
                tracing::warn!(error = %e, "failed to power off VM before delete");
            }
        }
        if let Err(e) = vm.delete().await {
            tracing::warn!(error = %e, "failed to delete VM");
        }
    }
}
