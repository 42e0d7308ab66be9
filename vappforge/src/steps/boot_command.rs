//! Type the boot command into the VM console.

use async_trait::async_trait;

use crate::bootcmd::{parse, BootCmdExecutor};
use crate::console::{ticket, wmks, WmksClient};
use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};
use crate::steps::modify_iso::template_vars;

pub struct BootCommandStep;

#[async_trait]
impl Step for BootCommandStep {
    fn name(&self) -> &'static str {
        "boot-command"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let boot = &ctx.options.boot;
        if boot.boot_command.is_empty() {
            tracing::info!("no boot command configured");
            return Ok(StepAction::Continue);
        }

        let wait = boot.boot_wait();
        if !wait.is_zero() {
            tracing::info!(?wait, "waiting for the VM to reach its boot prompt");
            ctx.cancel.sleep(wait).await?;
        }

        let vm = state.vm()?;
        tracing::info!("acquiring console ticket");
        let mks = ticket::acquire(&vm, &ctx.cancel).await?;
        tracing::info!(host = %mks.host, port = mks.port, "console ticket acquired");

        let socket = wmks::connect(&mks, ctx.options.connect.insecure_connection).await?;
        let mut client = WmksClient::new(socket, boot.key_interval(), ctx.cancel.clone());
        client.handshake().await?;
        tracing::info!("connected to VM console");

        // Render {{ .HTTPIP }} and friends before parsing.
        let mut vars = template_vars(state);
        vars.set("Name", ctx.options.location.vm_name.clone());
        if let Some(gateway) = state.network_gateway {
            vars.set("Gateway", gateway.to_string());
        }
        if let Some(netmask) = state.network_netmask {
            vars.set("Netmask", netmask.to_string());
        }
        if let Some(dns) = state.network_dns {
            vars.set("DNS", dns.to_string());
        }
        let rendered = vars.render(&boot.flat_command());
        let tokens = parse(&rendered);

        tracing::info!(keys = tokens.len(), "sending boot command");
        let result = BootCmdExecutor::new(
            &mut client,
            boot.key_interval(),
            boot.group_interval(),
            ctx.cancel.clone(),
        )
        .run(&tokens)
        .await;

        let _ = client.close().await;
        result?;

        tracing::info!("boot command sent");
        Ok(StepAction::Continue)
    }
}
