//! Discover the host address and start the answer-file server.

use async_trait::async_trait;

use crate::errors::ForgeResult;
use crate::http::{discover_host_ip, FileServer};
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

/// Publish the address the guest will reach the host on.
pub struct HttpIpDiscoverStep;

#[async_trait]
impl Step for HttpIpDiscoverStep {
    fn name(&self) -> &'static str {
        "discover-host-ip"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let http = &ctx.options.http;
        if http.http_directory.is_none() {
            return Ok(StepAction::Continue);
        }

        let ip = discover_host_ip(http.http_ip, http.http_interface.as_deref())?;
        tracing::info!(ip = %ip, "answer-file server address");
        state.http_ip = Some(ip);
        Ok(StepAction::Continue)
    }
}

/// Serve the answer-file directory for the lifetime of the build.
#[derive(Default)]
pub struct HttpServerStep {
    server: Option<FileServer>,
}

#[async_trait]
impl Step for HttpServerStep {
    fn name(&self) -> &'static str {
        "http-server"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let http = &ctx.options.http;
        let Some(root) = &http.http_directory else {
            return Ok(StepAction::Continue);
        };
        let Some(ip) = state.http_ip else {
            return Ok(StepAction::Continue);
        };

        let server = FileServer::serve(
            root.clone(),
            ip,
            (http.http_port_min, http.http_port_max),
        )
        .await?;
        state.http_port = Some(server.port());
        self.server = Some(server);
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, _state: &mut BuildState) {
        if let Some(server) = self.server.take() {
            server.stop().await;
        }
    }
}
