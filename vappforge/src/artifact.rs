//! The result of a build.

use std::sync::Arc;

use crate::driver::VirtualMachine;
use crate::errors::ForgeResult;

/// Where the built VM ended up, and the template it was captured to.
#[derive(Clone, serde::Serialize)]
pub struct Artifact {
    pub vm_name: String,
    pub vdc: String,
    pub vapp: String,
    /// Set when the build exported to a catalog.
    pub template_name: Option<String>,
    #[serde(skip)]
    pub(crate) vm: Option<Arc<dyn VirtualMachine>>,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("vm_name", &self.vm_name)
            .field("vdc", &self.vdc)
            .field("vapp", &self.vapp)
            .field("template_name", &self.template_name)
            .finish()
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VM {} in vApp {} (VDC {})",
            self.vm_name, self.vapp, self.vdc
        )
    }
}

impl Artifact {
    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.vdc, self.vapp, self.vm_name)
    }

    /// Destroy the built VM: power it off if needed, then delete it.
    pub async fn destroy(&self) -> ForgeResult<()> {
        let Some(vm) = &self.vm else {
            return Ok(());
        };
        if vm.is_powered_on().await? {
            vm.power_off().await?;
        }
        vm.delete().await
    }
}
