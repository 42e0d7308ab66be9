//! Power the VM on, substituting the guest address on conflicts.
//!
//! The cloud refuses power-on when the NIC's address is already in use
//! somewhere in the datacenter. Each refusal adds the failed address to the
//! exclusion list, allocates a fresh one from the pool, reconfigures the
//! NIC, and tries again within the retry budget.

use std::net::Ipv4Addr;

use async_trait::async_trait;

use crate::driver::allocator;
use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::{retry, BuildContext, BuildState, Step, StepAction};

pub struct PowerOnStep;

#[async_trait]
impl Step for PowerOnStep {
    fn name(&self) -> &'static str {
        "power-on"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let vm = state.vm()?;
        let network_name = ctx.options.network.network.clone();
        let mut failed_ips: Vec<Ipv4Addr> = Vec::new();

        let max_attempts = retry::POWER_ON_IP.max_attempts;
        for attempt in 1..=max_attempts {
            ctx.cancel.check()?;
            if attempt == 1 {
                tracing::info!("powering on VM");
            } else {
                tracing::info!(attempt, max_attempts, "retrying power-on");
            }

            let err = match vm.power_on().await {
                Ok(()) => {
                    tracing::info!("VM powered on");
                    return Ok(StepAction::Continue);
                }
                Err(err) => err,
            };

            if !err.is_ip_conflict() {
                return Err(err);
            }
            if network_name.is_empty() || state.vdc.is_none() {
                return Err(ForgeError::Conflict(format!(
                    "guest address is already in use and no network is configured \
                     for reallocation: {err}"
                )));
            }
            if attempt == max_attempts {
                return Err(ForgeError::Conflict(format!(
                    "address conflict persisted after {max_attempts} attempts \
                     (tried {failed_ips:?}): {err}"
                )));
            }

            if let Some(ip) = state.vm_ip {
                failed_ips.push(ip);
            }
            tracing::info!(?failed_ips, "address in use; picking another");

            let driver = state.driver()?;
            let vdc = state.vdc()?.clone();
            let scope = driver.network_scope(&vdc, &network_name).await?;
            let used = driver.used_ips(&vdc).await?;
            let lease = allocator::allocate(&scope, &used, &failed_ips)?;

            tracing::info!(ip = %lease.ip, "reconfiguring NIC");
            vm.change_ip_address(lease.ip).await?;
            state.vm_ip = Some(lease.ip);
        }

        Err(ForgeError::Internal("power-on retry loop exited".into()))
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, state: &mut BuildState) {
        // On a clean run the shutdown stage has already powered the VM off.
        if !state.aborted() {
            return;
        }
        let Some(vm) = &state.vm else {
            return;
        };
        match vm.is_powered_on().await {
            Ok(true) => {
                tracing::info!("powering off VM");
                if let Err(e) = vm.power_off().await {
                    tracing::warn!(error = %e, "failed to power off VM");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "failed to read VM power state"),
        }
    }
}
