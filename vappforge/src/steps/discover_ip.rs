//! Pick the guest address before the VM exists.
//!
//! A manual `vm_ip` is used as given; with `auto_discover_ip` the network's
//! static pool is scanned for the first address not already allocated, used
//! by an existing NIC, or equal to the gateway.

use async_trait::async_trait;

use crate::driver::allocator;
use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct DiscoverIpStep;

#[async_trait]
impl Step for DiscoverIpStep {
    fn name(&self) -> &'static str {
        "discover-ip"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let network = &ctx.options.network;

        if let Some(ip) = network.vm_ip {
            tracing::info!(ip = %ip, "using manually configured guest address");
            state.vm_ip = Some(ip);
            state.network_gateway = network.vm_gateway;
            state.network_dns = network.vm_dns;
            return Ok(StepAction::Continue);
        }

        if !network.auto_discover_ip {
            return Ok(StepAction::Continue);
        }

        let driver = state.driver()?;
        let vdc = state.vdc()?.clone();

        tracing::info!(network = %network.network, "discovering a free address in the static pool");
        let scope = driver.network_scope(&vdc, &network.network).await?;
        let used = driver.used_ips(&vdc).await?;
        let lease = allocator::allocate(&scope, &used, &[])?;

        let gateway = network.vm_gateway.unwrap_or(lease.gateway);
        let dns = network.vm_dns.or(lease.dns1);
        tracing::info!(
            ip = %lease.ip,
            gateway = %gateway,
            netmask = %lease.netmask,
            "discovered guest network settings"
        );

        state.vm_ip = Some(lease.ip);
        state.network_gateway = Some(gateway);
        state.network_netmask = Some(lease.netmask);
        state.network_dns = dns;
        Ok(StepAction::Continue)
    }
}
