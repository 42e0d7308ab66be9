//! Bring the guest down before capture.
//!
//! With a communicator and a shutdown command, the command runs in the
//! guest; otherwise guest tools are asked for a graceful shutdown; with no
//! communicator at all the step just waits for the installer to power the
//! machine off itself. In every case the step polls until power-off or the
//! timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::errors::{ForgeError, ForgeResult};
use crate::options::CommType;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ShutdownStep;

#[async_trait]
impl Step for ShutdownStep {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let vm = state.vm()?;
        let shutdown = &ctx.options.shutdown;
        let timeout = shutdown.timeout();

        if vm.is_powered_off().await.unwrap_or(false) {
            tracing::info!("VM is already powered off");
            return Ok(StepAction::Continue);
        }

        let has_communicator = ctx.options.comm.comm_type != CommType::None;
        if !has_communicator {
            tracing::info!(?timeout, "no communicator; waiting for the guest to power off");
        } else if shutdown.disable_shutdown {
            tracing::info!("automatic shutdown disabled; waiting for the guest");
        } else if !shutdown.shutdown_command.is_empty() {
            let comm = ctx.communicator.as_ref().ok_or_else(|| {
                ForgeError::Config("shutdown_command set but no communicator supplied".into())
            })?;
            tracing::info!(command = %shutdown.shutdown_command, "running shutdown command");
            comm.run(&shutdown.shutdown_command).await?;
        } else {
            tracing::info!(?timeout, "requesting guest-tools shutdown");
            vm.shutdown_guest().await?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            ctx.cancel.sleep(POLL_INTERVAL).await?;
            if vm.is_powered_off().await? {
                tracing::info!("VM powered off");
                return Ok(StepAction::Continue);
            }
            if Instant::now() > deadline {
                return Err(ForgeError::Timeout(format!(
                    "waiting for the VM to power off after {timeout:?}"
                )));
            }
        }
    }
}
