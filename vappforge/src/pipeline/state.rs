//! Build state shared between pipeline steps.
//!
//! Each field is written by exactly one step; later steps only read what
//! earlier steps published. Ownership of external resources is recorded in
//! the boolean flags, and cleanup consults those flags to decide what to
//! destroy. Caller-supplied resources are referenced but never owned.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;

use crate::driver::{Catalog, Driver, Vapp, Vdc, VirtualMachine};
use crate::errors::{ForgeError, ForgeResult};

/// The first fatal error of a build, together with the stage it escaped from.
#[derive(Debug)]
pub struct BuildFailure {
    pub stage: &'static str,
    pub error: ForgeError,
}

impl BuildFailure {
    pub fn into_error(self) -> ForgeError {
        self.error.in_stage(self.stage)
    }
}

impl std::fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

/// Mutable state bag passed between stages. Data flows strictly forward.
#[derive(Default)]
pub struct BuildState {
    /// Authenticated session; shared read-only by all later stages.
    pub driver: Option<Arc<dyn Driver>>,
    pub vdc: Option<Vdc>,

    pub vapp: Option<Vapp>,
    /// The vApp was created by this build and is deleted on abort.
    pub vapp_created: bool,

    pub vm: Option<Arc<dyn VirtualMachine>>,

    pub catalog: Option<Catalog>,
    pub catalog_name: Option<String>,
    /// The staging catalog was created by this build and is deleted on every
    /// exit path.
    pub temp_catalog: bool,

    /// Local path of the (possibly rewritten) installer image.
    pub iso_path: Option<PathBuf>,
    /// `sha256:<hex>` of the image at `iso_path`, recomputed after mutation.
    pub iso_checksum: Option<String>,
    pub iso_modified: bool,
    /// The image at `iso_path` was downloaded by this build.
    pub iso_downloaded: bool,

    pub uploaded_media_name: Option<String>,
    /// The media object was uploaded by this build (a cache hit clears it).
    pub media_was_uploaded: bool,
    pub iso_mounted: bool,

    /// Address injected into answer files and assigned to the NIC.
    pub vm_ip: Option<Ipv4Addr>,
    pub network_gateway: Option<Ipv4Addr>,
    pub network_netmask: Option<Ipv4Addr>,
    pub network_dns: Option<Ipv4Addr>,

    /// Answer-file server endpoint.
    pub http_ip: Option<IpAddr>,
    pub http_port: Option<u16>,

    /// The settled guest address the communicator connects to.
    pub guest_ip: Option<Ipv4Addr>,

    /// Name of the captured template, when exporting ran.
    pub template_name: Option<String>,

    /// First fatal error; blocks all remaining forward stages.
    pub error: Option<BuildFailure>,
    /// The build stopped because a stage failed.
    pub halted: bool,
    /// The build stopped because the caller cancelled it.
    pub cancelled: bool,
}

impl BuildState {
    pub fn new() -> BuildState {
        BuildState::default()
    }

    /// Whether cleanup should roll resources back rather than keep them.
    pub fn aborted(&self) -> bool {
        self.halted || self.cancelled
    }

    /// The session handle; set by the connect stage.
    pub fn driver(&self) -> ForgeResult<Arc<dyn Driver>> {
        self.driver
            .clone()
            .ok_or_else(|| missing("driver", "connect"))
    }

    pub fn vdc(&self) -> ForgeResult<&Vdc> {
        self.vdc.as_ref().ok_or_else(|| missing("vdc", "catalog"))
    }

    pub fn vapp(&self) -> ForgeResult<&Vapp> {
        self.vapp
            .as_ref()
            .ok_or_else(|| missing("vapp", "resolve-vapp"))
    }

    pub fn vm(&self) -> ForgeResult<Arc<dyn VirtualMachine>> {
        self.vm.clone().ok_or_else(|| missing("vm", "create-vm"))
    }

    pub fn catalog(&self) -> ForgeResult<&Catalog> {
        self.catalog
            .as_ref()
            .ok_or_else(|| missing("catalog", "catalog"))
    }

    pub fn iso_path(&self) -> ForgeResult<&PathBuf> {
        self.iso_path
            .as_ref()
            .ok_or_else(|| missing("iso_path", "download-image"))
    }
}

fn missing(key: &str, owner: &str) -> ForgeError {
    ForgeError::Internal(format!("{key} not in build state; did the {owner} stage run?"))
}
