//! In-memory cloud simulator.
//!
//! Implements the driver traits against a shared in-memory state with
//! configurable fault injection, so the whole pipeline can run end-to-end in
//! tests and in the CLI's rehearsal mode without a cloud endpoint. The
//! console is the one surface the simulator does not provide; builds run
//! against it with an empty boot command.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::driver::types::{
    Catalog, IpAllocationMode, MksTicket, NetworkScope, SizingPolicyRef, StorageProfileRef, Vapp,
    Vdc, VmSpec, MEDIA_STATUS_RESOLVED, TEMPLATE_STATUS_READY,
};
use crate::driver::{Driver, DriverFactory, VirtualMachine};
use crate::errors::{ForgeError, ForgeResult};
use crate::options::ConnectOptions;

/// Transient failures the simulator will serve before succeeding.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimFaults {
    /// Power-on attempts refused with an address conflict.
    pub power_on_ip_conflicts: u32,
    /// Media inserts refused with the settling 409.
    pub media_insert_conflicts: u32,
    /// Media status polls answered with "unresolved" before RESOLVED.
    pub media_resolve_polls: u32,
    /// Template status polls answered before READY.
    pub template_resolve_polls: u32,
    /// Power-state polls reporting "still running" before the simulated
    /// guest powers itself off (the installer finishing).
    pub guest_halt_polls: u32,
}

#[derive(Default)]
struct SimMedia {
    resolve_polls_left: u32,
    content: Vec<u8>,
}

#[derive(Default)]
struct SimCatalog {
    media: BTreeMap<String, SimMedia>,
    items: BTreeMap<String, u32>, // template name -> polls until ready
}

#[derive(Debug, Default, Clone)]
pub struct SimVmRecord {
    pub spec_name: String,
    pub powered_on: bool,
    pub ip: Option<Ipv4Addr>,
    pub allocation_mode: Option<IpAllocationMode>,
    pub inserted_media: Option<(String, String)>,
    pub ejected: bool,
    pub cpus: u32,
    pub cores_per_socket: u32,
    pub memory_mb: u64,
    pub sizing_policy: Option<String>,
    pub boot_delay_ms: u32,
    pub efi_secure_boot: bool,
    pub tpm: bool,
    pub deleted: bool,
    pub power_on_conflicts_left: u32,
    pub insert_conflicts_left: u32,
    pub halt_polls_left: u32,
}

struct SimState {
    vdc_name: String,
    storage_profiles: Vec<StorageProfileRef>,
    networks: BTreeMap<String, NetworkScope>,
    catalogs: BTreeMap<String, SimCatalog>,
    vapps: BTreeMap<String, Vec<String>>,
    vms: BTreeMap<String, SimVmRecord>,
    faults: SimFaults,
    /// Names of catalogs that have been deleted, for assertions.
    deleted_catalogs: Vec<String>,
    uploads: Vec<(String, String, std::path::PathBuf)>,
    captures: Vec<(String, String, String)>,
}

/// The simulated cloud. Clones share state.
#[derive(Clone)]
pub struct SimCloud {
    state: Arc<Mutex<SimState>>,
}

impl SimCloud {
    pub fn new(vdc_name: &str) -> SimCloud {
        SimCloud {
            state: Arc::new(Mutex::new(SimState {
                vdc_name: vdc_name.to_string(),
                storage_profiles: vec![StorageProfileRef {
                    name: "standard".into(),
                    href: "sim://storage/standard".into(),
                }],
                networks: BTreeMap::new(),
                catalogs: BTreeMap::new(),
                vapps: BTreeMap::new(),
                vms: BTreeMap::new(),
                faults: SimFaults::default(),
                deleted_catalogs: Vec::new(),
                uploads: Vec::new(),
                captures: Vec::new(),
            })),
        }
    }

    pub fn with_network(self, name: &str, scope: NetworkScope) -> SimCloud {
        self.lock().networks.insert(name.to_string(), scope);
        self
    }

    pub fn with_catalog(self, name: &str) -> SimCloud {
        self.lock()
            .catalogs
            .insert(name.to_string(), SimCatalog::default());
        self
    }

    pub fn with_faults(self, faults: SimFaults) -> SimCloud {
        self.lock().faults = faults;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Test inspection
    // ------------------------------------------------------------------

    pub fn vm(&self, name: &str) -> Option<SimVmRecord> {
        self.lock().vms.get(name).cloned()
    }

    pub fn catalog_names(&self) -> Vec<String> {
        self.lock().catalogs.keys().cloned().collect()
    }

    pub fn deleted_catalogs(&self) -> Vec<String> {
        self.lock().deleted_catalogs.clone()
    }

    pub fn uploads(&self) -> Vec<(String, String, std::path::PathBuf)> {
        self.lock().uploads.clone()
    }

    /// Bytes of an uploaded media object, as the cloud retained them.
    pub fn media_content(&self, catalog: &str, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .catalogs
            .get(catalog)
            .and_then(|c| c.media.get(name))
            .map(|m| m.content.clone())
    }

    pub fn captures(&self) -> Vec<(String, String, String)> {
        self.lock().captures.clone()
    }

    fn allocate_pool_ip(state: &mut SimState, network: &str) -> Option<Ipv4Addr> {
        let scope = state.networks.get(network)?;
        let used: Vec<Ipv4Addr> = state.vms.values().filter_map(|vm| vm.ip).collect();
        crate::driver::allocator::allocate(scope, &used, &[])
            .ok()
            .map(|lease| lease.ip)
    }
}

#[async_trait]
impl DriverFactory for SimCloud {
    async fn connect(&self, options: &ConnectOptions) -> ForgeResult<Arc<dyn Driver>> {
        tracing::debug!(host = %options.host, "sim: session opened");
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl Driver for SimCloud {
    async fn get_vdc(&self, name: &str) -> ForgeResult<Vdc> {
        let state = self.lock();
        if state.vdc_name != name {
            return Err(ForgeError::Cloud(format!("VDC {name} not found")));
        }
        Ok(Vdc {
            name: name.to_string(),
            href: format!("sim://vdc/{name}"),
            storage_profiles: state.storage_profiles.clone(),
        })
    }

    async fn get_catalog(&self, name: &str) -> ForgeResult<Catalog> {
        let state = self.lock();
        if !state.catalogs.contains_key(name) {
            return Err(ForgeError::Cloud(format!("catalog {name} not found")));
        }
        Ok(Catalog {
            name: name.to_string(),
            href: format!("sim://catalog/{name}"),
        })
    }

    async fn create_catalog(
        &self,
        name: &str,
        _description: &str,
        _storage_profile: Option<&StorageProfileRef>,
    ) -> ForgeResult<Catalog> {
        let mut state = self.lock();
        if state.catalogs.contains_key(name) {
            return Err(ForgeError::Conflict(format!("catalog {name} already exists")));
        }
        state.catalogs.insert(name.to_string(), SimCatalog::default());
        Ok(Catalog {
            name: name.to_string(),
            href: format!("sim://catalog/{name}"),
        })
    }

    async fn delete_catalog(&self, catalog: &Catalog) -> ForgeResult<()> {
        let mut state = self.lock();
        state
            .catalogs
            .remove(&catalog.name)
            .ok_or_else(|| ForgeError::Cloud(format!("catalog {} not found", catalog.name)))?;
        state.deleted_catalogs.push(catalog.name.clone());
        Ok(())
    }

    async fn get_media(&self, catalog: &Catalog, name: &str) -> ForgeResult<Option<String>> {
        let state = self.lock();
        Ok(state
            .catalogs
            .get(&catalog.name)
            .and_then(|c| c.media.get(name))
            .map(|_| name.to_string()))
    }

    async fn delete_media(&self, catalog: &Catalog, name: &str) -> ForgeResult<()> {
        let mut state = self.lock();
        let cat = state
            .catalogs
            .get_mut(&catalog.name)
            .ok_or_else(|| ForgeError::Cloud(format!("catalog {} not found", catalog.name)))?;
        cat.media.remove(name);
        Ok(())
    }

    async fn upload_media(
        &self,
        catalog: &Catalog,
        name: &str,
        _description: &str,
        path: &Path,
    ) -> ForgeResult<()> {
        let content = std::fs::read(path).map_err(|e| {
            ForgeError::Cloud(format!("upload source {} unreadable: {e}", path.display()))
        })?;
        let mut state = self.lock();
        let polls = state.faults.media_resolve_polls;
        let cat = state
            .catalogs
            .get_mut(&catalog.name)
            .ok_or_else(|| ForgeError::Cloud(format!("catalog {} not found", catalog.name)))?;
        cat.media.insert(
            name.to_string(),
            SimMedia {
                resolve_polls_left: polls,
                content,
            },
        );
        state
            .uploads
            .push((catalog.name.clone(), name.to_string(), path.to_path_buf()));
        Ok(())
    }

    async fn media_status(&self, catalog: &Catalog, name: &str) -> ForgeResult<i32> {
        let mut state = self.lock();
        let media = state
            .catalogs
            .get_mut(&catalog.name)
            .and_then(|c| c.media.get_mut(name))
            .ok_or_else(|| ForgeError::Cloud(format!("media {name} not found")))?;
        if media.resolve_polls_left > 0 {
            media.resolve_polls_left -= 1;
            return Ok(0);
        }
        Ok(MEDIA_STATUS_RESOLVED)
    }

    async fn get_vapp(&self, _vdc: &Vdc, name: &str) -> ForgeResult<Option<Vapp>> {
        let state = self.lock();
        Ok(state.vapps.contains_key(name).then(|| Vapp {
            name: name.to_string(),
            href: format!("sim://vapp/{name}"),
        }))
    }

    async fn create_vapp(
        &self,
        _vdc: &Vdc,
        name: &str,
        _description: &str,
        network: Option<&str>,
    ) -> ForgeResult<Vapp> {
        let mut state = self.lock();
        if let Some(network) = network {
            if !state.networks.contains_key(network) {
                return Err(ForgeError::Cloud(format!("network {network} not found")));
            }
        }
        state.vapps.insert(name.to_string(), Vec::new());
        Ok(Vapp {
            name: name.to_string(),
            href: format!("sim://vapp/{name}"),
        })
    }

    async fn delete_vapp(&self, vapp: &Vapp) -> ForgeResult<()> {
        let mut state = self.lock();
        let vms = state.vapps.remove(&vapp.name).unwrap_or_default();
        for vm in vms {
            if let Some(record) = state.vms.get_mut(&vm) {
                record.deleted = true;
            }
        }
        Ok(())
    }

    async fn create_vm(&self, vapp: &Vapp, spec: &VmSpec) -> ForgeResult<Arc<dyn VirtualMachine>> {
        let mut state = self.lock();
        let faults = state.faults;
        if !state.vapps.contains_key(&vapp.name) {
            return Err(ForgeError::Cloud(format!("vApp {} not found", vapp.name)));
        }

        let mut record = SimVmRecord {
            spec_name: spec.name.clone(),
            cpus: spec.cpus,
            cores_per_socket: spec.cores_per_socket,
            memory_mb: spec.memory_mb,
            power_on_conflicts_left: faults.power_on_ip_conflicts,
            insert_conflicts_left: faults.media_insert_conflicts,
            halt_polls_left: faults.guest_halt_polls,
            ..Default::default()
        };
        if let Some(network) = &spec.network {
            record.allocation_mode = Some(network.allocation_mode);
            record.ip = network.ip;
            // The cloud hands POOL guests their address at creation time.
            if record.ip.is_none() && network.allocation_mode == IpAllocationMode::Pool {
                record.ip = SimCloud::allocate_pool_ip(&mut state, &network.network);
            }
        }
        state.vms.insert(spec.name.clone(), record);
        if let Some(vms) = state.vapps.get_mut(&vapp.name) {
            vms.push(spec.name.clone());
        }

        Ok(Arc::new(SimVm {
            cloud: self.clone(),
            name: spec.name.clone(),
            network: spec.network.as_ref().map(|n| n.network.clone()),
        }))
    }

    async fn network_scope(&self, _vdc: &Vdc, network: &str) -> ForgeResult<NetworkScope> {
        let state = self.lock();
        state
            .networks
            .get(network)
            .cloned()
            .ok_or_else(|| ForgeError::Cloud(format!("network {network} not found")))
    }

    async fn used_ips(&self, _vdc: &Vdc) -> ForgeResult<Vec<Ipv4Addr>> {
        let state = self.lock();
        Ok(state.vms.values().filter_map(|vm| vm.ip).collect())
    }

    async fn find_storage_profile(
        &self,
        _vdc: &Vdc,
        name: &str,
    ) -> ForgeResult<StorageProfileRef> {
        let state = self.lock();
        state
            .storage_profiles
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| ForgeError::Cloud(format!("storage profile {name} not found")))
    }

    async fn find_sizing_policy(&self, _vdc: &Vdc, name: &str) -> ForgeResult<SizingPolicyRef> {
        Ok(SizingPolicyRef {
            name: name.to_string(),
            id: format!("sim:policy:{name}"),
        })
    }

    async fn get_catalog_item(
        &self,
        catalog: &Catalog,
        name: &str,
    ) -> ForgeResult<Option<String>> {
        let state = self.lock();
        Ok(state
            .catalogs
            .get(&catalog.name)
            .and_then(|c| c.items.get(name))
            .map(|_| name.to_string()))
    }

    async fn delete_catalog_item(&self, catalog: &Catalog, name: &str) -> ForgeResult<()> {
        let mut state = self.lock();
        if let Some(cat) = state.catalogs.get_mut(&catalog.name) {
            cat.items.remove(name);
        }
        Ok(())
    }

    async fn capture_template(
        &self,
        catalog: &Catalog,
        vapp: &Vapp,
        template_name: &str,
        _description: &str,
    ) -> ForgeResult<()> {
        let mut state = self.lock();
        let polls = state.faults.template_resolve_polls;
        let cat = state
            .catalogs
            .get_mut(&catalog.name)
            .ok_or_else(|| ForgeError::Cloud(format!("catalog {} not found", catalog.name)))?;
        cat.items.insert(template_name.to_string(), polls);
        state.captures.push((
            catalog.name.clone(),
            vapp.name.clone(),
            template_name.to_string(),
        ));
        Ok(())
    }

    async fn template_status(&self, catalog: &Catalog, name: &str) -> ForgeResult<i32> {
        let mut state = self.lock();
        let polls = state
            .catalogs
            .get_mut(&catalog.name)
            .and_then(|c| c.items.get_mut(name))
            .ok_or_else(|| ForgeError::Cloud(format!("template {name} not found")))?;
        if *polls > 0 {
            *polls -= 1;
            return Ok(1);
        }
        Ok(TEMPLATE_STATUS_READY)
    }

    async fn disconnect(&self) -> ForgeResult<()> {
        tracing::debug!("sim: session closed");
        Ok(())
    }
}

struct SimVm {
    cloud: SimCloud,
    name: String,
    network: Option<String>,
}

impl SimVm {
    fn with_record<T>(
        &self,
        f: impl FnOnce(&mut SimVmRecord) -> ForgeResult<T>,
    ) -> ForgeResult<T> {
        let mut state = self.cloud.lock();
        let record = state
            .vms
            .get_mut(&self.name)
            .ok_or_else(|| ForgeError::Cloud(format!("VM {} not found", self.name)))?;
        if record.deleted {
            return Err(ForgeError::Cloud(format!("VM {} is deleted", self.name)));
        }
        f(record)
    }
}

#[async_trait]
impl VirtualMachine for SimVm {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn href(&self) -> String {
        format!("sim://vm/{}", self.name)
    }

    async fn power_on(&self) -> ForgeResult<()> {
        let mut state = self.cloud.lock();
        let record = state
            .vms
            .get_mut(&self.name)
            .ok_or_else(|| ForgeError::Cloud(format!("VM {} not found", self.name)))?;
        if record.power_on_conflicts_left > 0 {
            record.power_on_conflicts_left -= 1;
            return Err(ForgeError::Cloud(
                "The following IP/MAC addresses have already been used".into(),
            ));
        }
        record.powered_on = true;

        // DHCP guests pick up an address once they boot.
        let needs_ip = record.ip.is_none()
            && matches!(record.allocation_mode, Some(IpAllocationMode::Dhcp));
        if needs_ip {
            if let Some(network) = &self.network {
                let ip = SimCloud::allocate_pool_ip(&mut state, network);
                if let Some(record) = state.vms.get_mut(&self.name) {
                    record.ip = ip;
                }
            }
        }
        Ok(())
    }

    async fn power_off(&self) -> ForgeResult<()> {
        self.with_record(|r| {
            r.powered_on = false;
            Ok(())
        })
    }

    async fn is_powered_on(&self) -> ForgeResult<bool> {
        self.with_record(|r| Ok(r.powered_on))
    }

    async fn is_powered_off(&self) -> ForgeResult<bool> {
        // A running simulated guest eventually powers itself off, the way an
        // unattended installer does once it finishes.
        self.with_record(|r| {
            if r.powered_on {
                if r.halt_polls_left > 0 {
                    r.halt_polls_left -= 1;
                } else {
                    r.powered_on = false;
                }
            }
            Ok(!r.powered_on)
        })
    }

    async fn shutdown_guest(&self) -> ForgeResult<()> {
        self.with_record(|r| {
            r.powered_on = false;
            Ok(())
        })
    }

    async fn ip_address(&self) -> ForgeResult<Option<Ipv4Addr>> {
        self.with_record(|r| Ok(r.ip))
    }

    async fn change_ip_address(&self, ip: Ipv4Addr) -> ForgeResult<()> {
        self.with_record(|r| {
            r.ip = Some(ip);
            Ok(())
        })
    }

    async fn change_cpu(&self, cpus: u32, cores_per_socket: u32) -> ForgeResult<()> {
        self.with_record(|r| {
            r.cpus = cpus;
            r.cores_per_socket = cores_per_socket;
            Ok(())
        })
    }

    async fn change_memory(&self, memory_mb: u64) -> ForgeResult<()> {
        self.with_record(|r| {
            r.memory_mb = memory_mb;
            Ok(())
        })
    }

    async fn apply_sizing_policy(&self, policy: &SizingPolicyRef) -> ForgeResult<()> {
        self.with_record(|r| {
            r.sizing_policy = Some(policy.name.clone());
            Ok(())
        })
    }

    async fn set_boot_options(
        &self,
        boot_delay_ms: u32,
        efi_secure_boot: bool,
    ) -> ForgeResult<()> {
        self.with_record(|r| {
            r.boot_delay_ms = boot_delay_ms;
            r.efi_secure_boot = efi_secure_boot;
            Ok(())
        })
    }

    async fn set_tpm(&self, present: bool) -> ForgeResult<()> {
        self.with_record(|r| {
            r.tpm = present;
            Ok(())
        })
    }

    async fn insert_media(&self, catalog_name: &str, media_name: &str) -> ForgeResult<()> {
        let media_exists = {
            let state = self.cloud.lock();
            state
                .catalogs
                .get(catalog_name)
                .map(|c| c.media.contains_key(media_name))
                .unwrap_or(false)
        };
        if !media_exists {
            return Err(ForgeError::Cloud(format!(
                "media {media_name} not found in catalog {catalog_name}"
            )));
        }
        self.with_record(|r| {
            if r.insert_conflicts_left > 0 {
                r.insert_conflicts_left -= 1;
                return Err(ForgeError::Cloud(
                    "409: operation not supported in the current state".into(),
                ));
            }
            r.inserted_media = Some((catalog_name.to_string(), media_name.to_string()));
            Ok(())
        })
    }

    async fn eject_media(&self, _catalog_name: &str, _media_name: &str) -> ForgeResult<()> {
        self.with_record(|r| {
            r.inserted_media = None;
            r.ejected = true;
            Ok(())
        })
    }

    async fn acquire_mks_ticket(&self) -> ForgeResult<MksTicket> {
        Err(ForgeError::Protocol(
            "the simulator does not expose a console".into(),
        ))
    }

    async fn refresh(&self) -> ForgeResult<()> {
        Ok(())
    }

    async fn delete(&self) -> ForgeResult<()> {
        self.with_record(|r| {
            r.deleted = true;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::types::{IpRange, VmNetworkSpec};

    fn cloud() -> SimCloud {
        SimCloud::new("vdc").with_network(
            "net",
            NetworkScope {
                gateway: Ipv4Addr::new(10, 0, 0, 1),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                dns1: None,
                dns2: None,
                ranges: vec![IpRange {
                    start: Ipv4Addr::new(10, 0, 0, 10),
                    end: Ipv4Addr::new(10, 0, 0, 12),
                }],
                allocated: Vec::new(),
            },
        )
    }

    fn spec(name: &str) -> VmSpec {
        VmSpec {
            name: name.into(),
            description: String::new(),
            computer_name: name.into(),
            guest_os_type: "other5xLinux64Guest".into(),
            firmware: crate::driver::types::Firmware::Bios,
            hardware_version: "vmx-21".into(),
            cpus: 1,
            cores_per_socket: 1,
            memory_mb: 1024,
            disk_size_mb: 1024,
            storage_profile: None,
            network: Some(VmNetworkSpec {
                network: "net".into(),
                allocation_mode: IpAllocationMode::Pool,
                ip: None,
                adapter_type: "E1000E".into(),
            }),
        }
    }

    #[tokio::test]
    async fn pool_addresses_are_unique_per_vm() {
        let cloud = cloud();
        let vdc = cloud.get_vdc("vdc").await.unwrap();
        let vapp = cloud.create_vapp(&vdc, "app", "", Some("net")).await.unwrap();
        let vm1 = cloud.create_vm(&vapp, &spec("one")).await.unwrap();
        let vm2 = cloud.create_vm(&vapp, &spec("two")).await.unwrap();
        let ip1 = vm1.ip_address().await.unwrap().unwrap();
        let ip2 = vm2.ip_address().await.unwrap().unwrap();
        assert_ne!(ip1, ip2);
    }

    #[tokio::test]
    async fn injected_conflicts_drain_then_power_on_succeeds() {
        let cloud = cloud().with_faults(SimFaults {
            power_on_ip_conflicts: 1,
            ..Default::default()
        });
        let vdc = cloud.get_vdc("vdc").await.unwrap();
        let vapp = cloud.create_vapp(&vdc, "app", "", Some("net")).await.unwrap();
        let vm = cloud.create_vm(&vapp, &spec("one")).await.unwrap();

        let err = vm.power_on().await.unwrap_err();
        assert!(err.is_ip_conflict());
        vm.power_on().await.unwrap();
        assert!(vm.is_powered_on().await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_vapp_deletes_its_vms() {
        let cloud = cloud();
        let vdc = cloud.get_vdc("vdc").await.unwrap();
        let vapp = cloud.create_vapp(&vdc, "app", "", None).await.unwrap();
        let vm = cloud.create_vm(&vapp, &spec("one")).await.unwrap();
        cloud.delete_vapp(&vapp).await.unwrap();
        assert!(vm.is_powered_on().await.is_err());
        assert!(cloud.vm("one").unwrap().deleted);
    }
}
