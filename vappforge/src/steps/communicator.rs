//! Connect the communicator and run the caller's provisioners.

use async_trait::async_trait;

use crate::errors::{ForgeError, ForgeResult};
use crate::options::CommType;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct CommunicatorStep;

#[async_trait]
impl Step for CommunicatorStep {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        if ctx.options.comm.comm_type == CommType::None {
            tracing::info!("no communicator configured; skipping provisioning");
            return Ok(StepAction::Continue);
        }
        let Some(comm) = &ctx.communicator else {
            return Err(ForgeError::Config(
                "a communicator is configured but none was supplied to the builder".into(),
            ));
        };
        let host = state.guest_ip.ok_or_else(|| {
            ForgeError::Internal("guest_ip not in build state; did wait-for-ip run?".into())
        })?;

        tracing::info!(host = %host, "connecting communicator");
        comm.connect(host, &ctx.cancel).await?;

        for provisioner in &ctx.provisioners {
            ctx.cancel.check()?;
            tracing::info!(provisioner = %provisioner.name(), "running provisioner");
            provisioner.provision(comm.as_ref(), &ctx.cancel).await?;
        }
        Ok(StepAction::Continue)
    }
}
