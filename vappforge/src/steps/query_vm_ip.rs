//! Learn the address the cloud assigned to the VM.
//!
//! Used on the late-bind path: with POOL allocation the cloud picks the
//! address at VM creation, and answer files that bake it in can only be
//! rendered afterwards.

use async_trait::async_trait;

use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct QueryVmIpStep;

#[async_trait]
impl Step for QueryVmIpStep {
    fn name(&self) -> &'static str {
        "query-vm-ip"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        if let Some(ip) = state.vm_ip {
            tracing::info!(ip = %ip, "guest address already known");
            return Ok(StepAction::Continue);
        }

        let vm = state.vm()?;
        let ip = vm.ip_address().await?.ok_or_else(|| {
            ForgeError::Cloud(
                "VM has no IP address assigned; check the network configuration".into(),
            )
        })?;
        tracing::info!(ip = %ip, "cloud assigned guest address");
        state.vm_ip = Some(ip);

        let network = &ctx.options.network;
        if !network.network.is_empty() {
            let driver = state.driver()?;
            let vdc = state.vdc()?;
            match driver.network_scope(vdc, &network.network).await {
                Ok(scope) => {
                    state.network_gateway =
                        Some(network.vm_gateway.unwrap_or(scope.gateway));
                    state.network_netmask = Some(scope.netmask);
                    state.network_dns = network.vm_dns.or(scope.dns1);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not read network scope");
                    state.network_gateway = network.vm_gateway;
                    state.network_dns = network.vm_dns;
                }
            }
        }
        Ok(StepAction::Continue)
    }
}
