//! Cloud driver interfaces.
//!
//! All Cloud Director interaction goes through the `Driver` and
//! `VirtualMachine` traits. The REST client behind them is an external
//! collaborator; this crate ships the traits, the value types, and an
//! in-memory simulator (`crate::sim`) for tests and rehearsal runs.

pub mod allocator;
pub mod types;

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ForgeResult;
use crate::options::ConnectOptions;
pub use types::{
    Catalog, Firmware, IpAllocationMode, IpRange, MksTicket, NetworkScope, SizingPolicyRef,
    StorageProfileRef, Vapp, Vdc, VmNetworkSpec, VmSpec,
};

/// Opens authenticated driver sessions. The connect step owns the session for
/// the lifetime of the build and disconnects it during cleanup.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> ForgeResult<Arc<dyn Driver>>;
}

/// An authenticated session against one organization.
///
/// Long-running operations (catalog and media deletion, uploads, captures)
/// block until the cloud task behind them completes; polling loops with
/// user-visible timeouts stay in the pipeline steps.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn get_vdc(&self, name: &str) -> ForgeResult<Vdc>;

    async fn get_catalog(&self, name: &str) -> ForgeResult<Catalog>;

    async fn create_catalog(
        &self,
        name: &str,
        description: &str,
        storage_profile: Option<&StorageProfileRef>,
    ) -> ForgeResult<Catalog>;

    /// Delete a catalog together with its items.
    async fn delete_catalog(&self, catalog: &Catalog) -> ForgeResult<()>;

    /// Look up a media object by name; `None` when absent.
    async fn get_media(&self, catalog: &Catalog, name: &str) -> ForgeResult<Option<String>>;

    async fn delete_media(&self, catalog: &Catalog, name: &str) -> ForgeResult<()>;

    /// Upload a local file as a media object, streaming it in
    /// `types::UPLOAD_PIECE_SIZE` pieces.
    async fn upload_media(
        &self,
        catalog: &Catalog,
        name: &str,
        description: &str,
        path: &Path,
    ) -> ForgeResult<()>;

    /// Raw media status integer; `types::MEDIA_STATUS_RESOLVED` means settled.
    async fn media_status(&self, catalog: &Catalog, name: &str) -> ForgeResult<i32>;

    async fn get_vapp(&self, vdc: &Vdc, name: &str) -> ForgeResult<Option<Vapp>>;

    /// Create an empty vApp, attach `network` when given, and wait until the
    /// vApp reaches a stable state.
    async fn create_vapp(
        &self,
        vdc: &Vdc,
        name: &str,
        description: &str,
        network: Option<&str>,
    ) -> ForgeResult<Vapp>;

    async fn delete_vapp(&self, vapp: &Vapp) -> ForgeResult<()>;

    async fn create_vm(&self, vapp: &Vapp, spec: &VmSpec) -> ForgeResult<Arc<dyn VirtualMachine>>;

    /// The first IP scope of the named org VDC network.
    async fn network_scope(&self, vdc: &Vdc, network: &str) -> ForgeResult<NetworkScope>;

    /// Every address observed on any NIC of any VM in the datacenter. The
    /// cloud's allocated list misses MANUAL assignments, so the allocator
    /// unions this in.
    async fn used_ips(&self, vdc: &Vdc) -> ForgeResult<Vec<Ipv4Addr>>;

    async fn find_storage_profile(
        &self,
        vdc: &Vdc,
        name: &str,
    ) -> ForgeResult<StorageProfileRef>;

    async fn find_sizing_policy(&self, vdc: &Vdc, name: &str) -> ForgeResult<SizingPolicyRef>;

    /// Look up a catalog item (template) by name; `None` when absent.
    async fn get_catalog_item(&self, catalog: &Catalog, name: &str) -> ForgeResult<Option<String>>;

    /// Delete a catalog item. Returns once the delete task is accepted;
    /// callers poll `get_catalog_item` for completion.
    async fn delete_catalog_item(&self, catalog: &Catalog, name: &str) -> ForgeResult<()>;

    /// Capture a vApp as a template named `template_name`, with
    /// `CustomizeOnInstantiate` set. Returns once the capture task is
    /// accepted; callers poll `template_status`.
    async fn capture_template(
        &self,
        catalog: &Catalog,
        vapp: &Vapp,
        template_name: &str,
        description: &str,
    ) -> ForgeResult<()>;

    /// Raw template status integer; `types::TEMPLATE_STATUS_READY` means the
    /// template is resolved and ready for instantiation.
    async fn template_status(&self, catalog: &Catalog, name: &str) -> ForgeResult<i32>;

    async fn disconnect(&self) -> ForgeResult<()>;
}

/// One virtual machine inside a vApp.
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    fn name(&self) -> String;
    fn href(&self) -> String;

    async fn power_on(&self) -> ForgeResult<()>;
    async fn power_off(&self) -> ForgeResult<()>;
    async fn is_powered_on(&self) -> ForgeResult<bool>;
    async fn is_powered_off(&self) -> ForgeResult<bool>;

    /// Ask guest tools for a graceful shutdown.
    async fn shutdown_guest(&self) -> ForgeResult<()>;

    /// The address on the primary NIC, if one is assigned yet.
    async fn ip_address(&self) -> ForgeResult<Option<Ipv4Addr>>;

    /// Reconfigure the primary NIC to a new manual address.
    async fn change_ip_address(&self, ip: Ipv4Addr) -> ForgeResult<()>;

    async fn change_cpu(&self, cpus: u32, cores_per_socket: u32) -> ForgeResult<()>;
    async fn change_memory(&self, memory_mb: u64) -> ForgeResult<()>;

    /// Assign a sizing policy, superseding manual CPU/memory settings while
    /// preserving any placement policy already on the VM.
    async fn apply_sizing_policy(&self, policy: &SizingPolicyRef) -> ForgeResult<()>;

    async fn set_boot_options(&self, boot_delay_ms: u32, efi_secure_boot: bool)
        -> ForgeResult<()>;

    /// POST a TrustedPlatformModule section with `TpmPresent` set.
    async fn set_tpm(&self, present: bool) -> ForgeResult<()>;

    async fn insert_media(&self, catalog_name: &str, media_name: &str) -> ForgeResult<()>;
    async fn eject_media(&self, catalog_name: &str, media_name: &str) -> ForgeResult<()>;

    /// POST the screen-ticket action. Implementations follow the VM's ticket
    /// link and fall back to `<vm-href>/screen/action/acquireMksTicket`.
    async fn acquire_mks_ticket(&self) -> ForgeResult<MksTicket>;

    async fn refresh(&self) -> ForgeResult<()>;
    async fn delete(&self) -> ForgeResult<()>;
}
