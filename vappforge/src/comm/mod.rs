//! Post-install communicator and provisioner seams.
//!
//! The SSH/WinRM transports themselves are external collaborators; the
//! pipeline only needs to connect to the settled guest address, run the
//! caller's provisioners, and optionally issue the shutdown command.

use std::net::Ipv4Addr;

use async_trait::async_trait;

use crate::errors::ForgeResult;
use crate::pipeline::cancel::CancelToken;

/// Output of a remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A connected-on-demand remote shell to the guest.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Wait until the transport accepts connections at `host`.
    async fn connect(&self, host: Ipv4Addr, cancel: &CancelToken) -> ForgeResult<()>;

    async fn run(&self, command: &str) -> ForgeResult<CommandOutput>;
}

/// A provisioning hook run against the connected communicator.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &str;

    async fn provision(&self, comm: &dyn Communicator, cancel: &CancelToken) -> ForgeResult<()>;
}

/// Records connections and commands instead of talking to a guest; used by
/// tests and rehearsal runs.
#[derive(Default)]
pub struct RecordingCommunicator {
    pub connected_to: std::sync::Mutex<Option<Ipv4Addr>>,
    pub commands: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Communicator for RecordingCommunicator {
    async fn connect(&self, host: Ipv4Addr, _cancel: &CancelToken) -> ForgeResult<()> {
        *self
            .connected_to
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(host);
        Ok(())
    }

    async fn run(&self, command: &str) -> ForgeResult<CommandOutput> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.to_string());
        Ok(CommandOutput::default())
    }
}
