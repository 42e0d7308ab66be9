//! Console ticket acquisition.
//!
//! Tickets are valid for roughly thirty seconds and are single-use, and the
//! console endpoint is not ready the instant a VM powers on, so acquisition
//! is retried on a fixed cadence before giving up.

use std::sync::Arc;

use crate::driver::types::MksTicket;
use crate::driver::VirtualMachine;
use crate::errors::ForgeResult;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::retry;

/// Acquire a console ticket for `vm`, waiting for the console to come up.
pub async fn acquire(
    vm: &Arc<dyn VirtualMachine>,
    cancel: &CancelToken,
) -> ForgeResult<MksTicket> {
    retry::MKS_TICKET
        .run(
            cancel,
            |attempt| async move {
                if attempt > 1 {
                    tracing::info!(attempt, "waiting for VM console to be ready");
                }
                vm.acquire_mks_ticket().await
            },
            |_| true,
        )
        .await
}
