//! Wait for the guest to publish a stable address.
//!
//! The address must stay unchanged for the settle window before it counts;
//! installers bring interfaces up and down while partitioning the disk.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct WaitForIpStep;

#[async_trait]
impl Step for WaitForIpStep {
    fn name(&self) -> &'static str {
        "wait-for-ip"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        // Nothing connects to the guest without a communicator.
        if ctx.options.comm.comm_type == crate::options::CommType::None {
            return Ok(StepAction::Continue);
        }
        let vm = state.vm()?;
        let timeout = ctx.options.wait.wait_timeout();
        let settle = ctx.options.wait.settle_timeout();

        tracing::info!(?timeout, "waiting for the guest to acquire an address");
        let deadline = Instant::now() + timeout;
        let mut last_ip = None;
        let mut settled_since = Instant::now();

        loop {
            ctx.cancel.sleep(POLL_INTERVAL).await?;
            if Instant::now() > deadline {
                return Err(ForgeError::Timeout(format!(
                    "waiting for the guest address after {timeout:?}"
                )));
            }

            let ip = match vm.ip_address().await {
                Ok(ip) => ip,
                Err(e) => {
                    tracing::debug!(error = %e, "address query failed; still waiting");
                    continue;
                }
            };
            let Some(ip) = ip else {
                last_ip = None;
                continue;
            };

            if last_ip != Some(ip) {
                tracing::info!(ip = %ip, "guest address seen; waiting for it to settle");
                last_ip = Some(ip);
                settled_since = Instant::now();
                continue;
            }
            if settled_since.elapsed() >= settle {
                tracing::info!(ip = %ip, "guest address settled");
                state.guest_ip = Some(ip);
                return Ok(StepAction::Continue);
            }
        }
    }
}
