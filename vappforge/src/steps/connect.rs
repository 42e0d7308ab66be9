//! Open the cloud session.

use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::DriverFactory;
use crate::errors::ForgeResult;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};

pub struct ConnectStep {
    factory: Arc<dyn DriverFactory>,
}

impl ConnectStep {
    pub fn new(factory: Arc<dyn DriverFactory>) -> ConnectStep {
        ConnectStep { factory }
    }
}

#[async_trait]
impl Step for ConnectStep {
    fn name(&self) -> &'static str {
        "connect"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let driver = self.factory.connect(&ctx.options.connect).await?;
        tracing::info!(
            host = %ctx.options.connect.host,
            org = %ctx.options.connect.org,
            "connected to cloud endpoint"
        );
        state.driver = Some(driver);
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, state: &mut BuildState) {
        if let Some(driver) = &state.driver {
            tracing::info!("closing cloud session");
            if let Err(e) = driver.disconnect().await {
                tracing::warn!(error = %e, "failed to close cloud session");
            }
        }
    }
}
