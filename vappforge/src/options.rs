//! Build configuration.
//!
//! Options are grouped the way the pipeline consumes them. Every group
//! derives serde so the CLI can load JSON config files, and `BuildOptions::
//! sanitize` validates the whole surface before a build starts.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::driver::types::{Firmware, IpAllocationMode};
use crate::errors::{ForgeError, ForgeResult};

/// Connection settings for the cloud endpoint.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConnectOptions {
    pub host: String,
    pub org: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// API token; replaces username/password when set.
    #[serde(default)]
    pub token: String,
    /// Skip TLS certificate validation.
    #[serde(default)]
    pub insecure_connection: bool,
}

impl ConnectOptions {
    fn sanitize(&self) -> Vec<String> {
        let mut errs = Vec::new();
        if self.host.is_empty() {
            errs.push("'host' is required".into());
        }
        if self.org.is_empty() {
            errs.push("'org' is required".into());
        }
        if self.token.is_empty() {
            if self.username.is_empty() {
                errs.push("'username' is required if 'token' is not provided".into());
            }
            if self.password.is_empty() {
                errs.push("'password' is required if 'token' is not provided".into());
            }
        }
        errs
    }
}

/// Where the VM is built.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LocationOptions {
    pub vm_name: String,
    /// Existing vApp to build in; generated when empty and `create_vapp` is
    /// set.
    #[serde(default)]
    pub vapp: String,
    pub vdc: String,
    #[serde(default)]
    pub create_vapp: bool,
    /// Prefix for generated vApp names.
    #[serde(default = "default_resource_prefix")]
    pub vapp_prefix: String,
    #[serde(default)]
    pub storage_profile: String,
}

fn default_resource_prefix() -> String {
    "forge-".into()
}

impl Default for LocationOptions {
    fn default() -> Self {
        LocationOptions {
            vm_name: String::new(),
            vapp: String::new(),
            vdc: String::new(),
            create_vapp: false,
            vapp_prefix: default_resource_prefix(),
            storage_profile: String::new(),
        }
    }
}

/// Guest addressing.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NetworkOptions {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub ip_allocation_mode: IpAllocationMode,
    /// Manual address for MANUAL mode.
    #[serde(default)]
    pub vm_ip: Option<Ipv4Addr>,
    /// Pick a free address from the network's static pool before the build.
    #[serde(default)]
    pub auto_discover_ip: bool,
    #[serde(default)]
    pub vm_gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub vm_dns: Option<Ipv4Addr>,
}

/// Firmware as configured; `EfiSecure` folds into EFI plus the secure-boot
/// flag when talking to the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirmwareMode {
    Bios,
    Efi,
    EfiSecure,
}

impl Default for FirmwareMode {
    fn default() -> Self {
        FirmwareMode::Bios
    }
}

impl FirmwareMode {
    pub fn firmware(&self) -> Firmware {
        match self {
            FirmwareMode::Bios => Firmware::Bios,
            FirmwareMode::Efi | FirmwareMode::EfiSecure => Firmware::Efi,
        }
    }

    pub fn secure_boot(&self) -> bool {
        matches!(self, FirmwareMode::EfiSecure)
    }

    pub fn is_efi(&self) -> bool {
        !matches!(self, FirmwareMode::Bios)
    }
}

/// Hardware shape of the VM.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HardwareOptions {
    #[serde(rename = "CPUs", default)]
    pub cpus: u32,
    #[serde(default)]
    pub cores_per_socket: u32,
    /// Memory in MB.
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub firmware: FirmwareMode,
    /// Hardware version, e.g. `vmx-21`.
    #[serde(default = "default_hw_version")]
    pub hw_version: String,
    #[serde(rename = "vTPM", default)]
    pub vtpm: bool,
    /// Boot delay in seconds.
    #[serde(default)]
    pub boot_delay: u32,
    /// Named sizing policy; mutually exclusive with CPUs/memory.
    #[serde(default)]
    pub vm_sizing_policy: String,
    /// Primary disk size in MB.
    #[serde(default = "default_disk_size_mb")]
    pub disk_size: u64,
    #[serde(default = "default_guest_os_type")]
    pub guest_os_type: String,
    /// NIC model for the primary adapter.
    #[serde(default = "default_adapter_type")]
    pub network_adapter_type: String,
}

fn default_hw_version() -> String {
    "vmx-21".into()
}

fn default_disk_size_mb() -> u64 {
    32 * 1024
}

fn default_guest_os_type() -> String {
    "other5xLinux64Guest".into()
}

fn default_adapter_type() -> String {
    "E1000E".into()
}

impl Default for HardwareOptions {
    fn default() -> Self {
        HardwareOptions {
            cpus: 0,
            cores_per_socket: 0,
            memory: 0,
            firmware: FirmwareMode::default(),
            hw_version: default_hw_version(),
            vtpm: false,
            boot_delay: 0,
            vm_sizing_policy: String::new(),
            disk_size: default_disk_size_mb(),
            guest_os_type: default_guest_os_type(),
            network_adapter_type: default_adapter_type(),
        }
    }
}

impl HardwareOptions {
    fn sanitize(&self) -> Vec<String> {
        let mut errs = Vec::new();
        if self.vtpm && !self.firmware.is_efi() {
            errs.push("'vTPM' requires 'firmware' set to 'efi' or 'efi-secure'".into());
        }
        if !self.vm_sizing_policy.is_empty() && (self.cpus > 0 || self.memory > 0) {
            errs.push("'vm_sizing_policy' is mutually exclusive with 'CPUs'/'memory'".into());
        }
        errs
    }
}

/// Installer image source, staging catalog, and injected content.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ImageOptions {
    pub iso_url: String,
    /// `sha256:<hex>` digest of the source image.
    #[serde(default)]
    pub iso_checksum: String,
    /// Existing catalog for the staged image; a temporary catalog is created
    /// and deleted when empty.
    #[serde(default)]
    pub iso_catalog: String,
    #[serde(default = "default_resource_prefix")]
    pub temp_catalog_prefix: String,
    /// Reuse an already-uploaded media object with the same name.
    #[serde(default)]
    pub cache_iso: bool,
    /// Delete and re-upload an existing media object.
    #[serde(default)]
    pub cache_overwrite: bool,
    /// Directory downloaded images are cached in.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Destination path inside the image -> file content. Content goes
    /// through template-variable substitution before it is written.
    #[serde(default)]
    pub cd_content: BTreeMap<String, String>,
    /// Local files or directories copied into the image root.
    #[serde(default)]
    pub cd_files: Vec<PathBuf>,
    /// Manual symlink resolution: image path of the link -> image path of
    /// its target. Takes precedence over the built-in heuristics.
    #[serde(default)]
    pub symlink_targets: BTreeMap<String, String>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        ImageOptions {
            iso_url: String::new(),
            iso_checksum: String::new(),
            iso_catalog: String::new(),
            temp_catalog_prefix: default_resource_prefix(),
            cache_iso: false,
            cache_overwrite: false,
            cache_dir: None,
            cd_content: BTreeMap::new(),
            cd_files: Vec::new(),
            symlink_targets: BTreeMap::new(),
        }
    }
}

impl ImageOptions {
    /// Whether any content is injected into the installer image.
    pub fn has_injected_content(&self) -> bool {
        !self.cd_content.is_empty() || !self.cd_files.is_empty()
    }
}

/// The answer-file HTTP server.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HttpOptions {
    /// Directory served to the guest; the server only starts when set.
    #[serde(default)]
    pub http_directory: Option<PathBuf>,
    /// Explicit address to bind and publish.
    #[serde(default)]
    pub http_ip: Option<IpAddr>,
    /// Interface to take the published address from.
    #[serde(default)]
    pub http_interface: Option<String>,
    #[serde(default)]
    pub http_port_min: u16,
    #[serde(default)]
    pub http_port_max: u16,
}

/// Boot command and its pacing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BootOptions {
    #[serde(default)]
    pub boot_command: Vec<String>,
    /// Seconds to wait after power-on before typing.
    #[serde(default = "default_boot_wait_secs")]
    pub boot_wait: u64,
    /// Milliseconds between key presses.
    #[serde(default = "default_key_interval_ms")]
    pub boot_key_interval: u64,
    /// Milliseconds between bracketed groups.
    #[serde(default)]
    pub boot_group_interval: u64,
}

fn default_boot_wait_secs() -> u64 {
    10
}

fn default_key_interval_ms() -> u64 {
    100
}

impl Default for BootOptions {
    fn default() -> Self {
        BootOptions {
            boot_command: Vec::new(),
            boot_wait: default_boot_wait_secs(),
            boot_key_interval: default_key_interval_ms(),
            boot_group_interval: 0,
        }
    }
}

impl BootOptions {
    pub fn flat_command(&self) -> String {
        self.boot_command.concat()
    }

    pub fn boot_wait(&self) -> Duration {
        Duration::from_secs(self.boot_wait)
    }

    pub fn key_interval(&self) -> Duration {
        Duration::from_millis(self.boot_key_interval)
    }

    pub fn group_interval(&self) -> Duration {
        Duration::from_millis(self.boot_group_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommType {
    None,
    Ssh,
    Winrm,
}

impl Default for CommType {
    fn default() -> Self {
        CommType::None
    }
}

/// Communicator selection; credentials are passed through to the external
/// communicator implementation untouched.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CommOptions {
    #[serde(rename = "communicator", default)]
    pub comm_type: CommType,
    #[serde(rename = "comm_username", default)]
    pub username: String,
    #[serde(rename = "comm_password", default)]
    pub password: String,
    #[serde(rename = "comm_port", default)]
    pub port: Option<u16>,
}

/// Waiting for the guest to publish an address.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WaitOptions {
    /// Seconds to wait for the guest IP.
    #[serde(default = "default_ip_wait_secs")]
    pub ip_wait_timeout: u64,
    /// Seconds the address must stay unchanged before it counts.
    #[serde(default = "default_ip_settle_secs")]
    pub ip_settle_timeout: u64,
}

fn default_ip_wait_secs() -> u64 {
    30 * 60
}

fn default_ip_settle_secs() -> u64 {
    5
}

impl Default for WaitOptions {
    fn default() -> Self {
        WaitOptions {
            ip_wait_timeout: default_ip_wait_secs(),
            ip_settle_timeout: default_ip_settle_secs(),
        }
    }
}

impl WaitOptions {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.ip_wait_timeout)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.ip_settle_timeout)
    }
}

/// Guest shutdown behavior after provisioning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ShutdownOptions {
    /// Command run over the communicator; guest tools are used when empty.
    #[serde(default)]
    pub shutdown_command: String,
    /// Seconds to wait for power-off.
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_timeout: u64,
    /// Do not initiate shutdown; only wait for the guest to power off.
    #[serde(default)]
    pub disable_shutdown: bool,
}

fn default_shutdown_secs() -> u64 {
    5 * 60
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        ShutdownOptions {
            shutdown_command: String::new(),
            shutdown_timeout: default_shutdown_secs(),
            disable_shutdown: false,
        }
    }
}

impl ShutdownOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// Capturing the result into a catalog.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExportOptions {
    pub catalog: String,
    /// Template name; defaults to the VM name.
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub description: String,
    /// Replace an existing template with the same name.
    #[serde(default)]
    pub overwrite: bool,
    /// Create the export catalog when it does not exist.
    #[serde(default)]
    pub create_catalog: bool,
}

/// The full configuration surface of one build.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BuildOptions {
    #[serde(flatten)]
    pub connect: ConnectOptions,
    #[serde(flatten)]
    pub location: LocationOptions,
    #[serde(flatten)]
    pub network: NetworkOptions,
    #[serde(flatten)]
    pub hardware: HardwareOptions,
    #[serde(flatten)]
    pub image: ImageOptions,
    #[serde(flatten)]
    pub http: HttpOptions,
    #[serde(flatten)]
    pub boot: BootOptions,
    #[serde(flatten)]
    pub comm: CommOptions,
    #[serde(flatten)]
    pub wait: WaitOptions,
    #[serde(flatten)]
    pub shutdown: ShutdownOptions,
    /// Exporting is skipped entirely when absent.
    #[serde(default)]
    pub export: Option<ExportOptions>,
}

impl BuildOptions {
    /// Validate the configuration. All problems are reported at once.
    pub fn sanitize(&self) -> ForgeResult<()> {
        let mut errs = self.connect.sanitize();

        if self.location.vm_name.is_empty() {
            errs.push("'vm_name' is required".into());
        }
        if self.location.vdc.is_empty() {
            errs.push("'vdc' is required".into());
        }
        if self.image.iso_url.is_empty() {
            errs.push("'iso_url' is required".into());
        }

        errs.extend(self.hardware.sanitize());

        if self.network.ip_allocation_mode == IpAllocationMode::Manual
            && self.network.vm_ip.is_none()
            && !self.network.auto_discover_ip
        {
            errs.push(
                "MANUAL allocation requires 'vm_ip' or 'auto_discover_ip'".into(),
            );
        }
        if self.network.auto_discover_ip && self.network.network.is_empty() {
            errs.push("'auto_discover_ip' requires a 'network'".into());
        }

        if let Some(export) = &self.export {
            if export.catalog.is_empty() {
                errs.push("export 'catalog' is required".into());
            }
        }

        if self.http.http_port_min > self.http.http_port_max {
            errs.push("'http_port_min' must not exceed 'http_port_max'".into());
        }

        if self.comm.comm_type == CommType::None && !self.shutdown.shutdown_command.is_empty() {
            tracing::warn!(
                "'shutdown_command' is ignored because no communicator is configured"
            );
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ForgeError::Config(errs.join("; ")))
        }
    }

    /// Template name for export, defaulting to the VM name.
    pub fn template_name(&self) -> Option<String> {
        self.export.as_ref().map(|e| {
            if e.template_name.is_empty() {
                self.location.vm_name.clone()
            } else {
                e.template_name.clone()
            }
        })
    }

    /// Whether mutation and upload must wait until the cloud has assigned
    /// the guest IP.
    pub fn needs_late_bind(&self) -> bool {
        self.network.auto_discover_ip && self.image.has_injected_content()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BuildOptions {
        BuildOptions {
            connect: ConnectOptions {
                host: "vcd.example.com".into(),
                org: "lab".into(),
                token: "tok".into(),
                ..Default::default()
            },
            location: LocationOptions {
                vm_name: "base-image".into(),
                vdc: "lab-vdc".into(),
                create_vapp: true,
                ..Default::default()
            },
            image: ImageOptions {
                iso_url: "https://example.com/installer.iso".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn valid_options_pass() {
        valid().sanitize().unwrap();
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let mut opts = valid();
        opts.connect.token.clear();
        let err = opts.sanitize().unwrap_err();
        assert!(err.to_string().contains("'username' is required"));
        assert!(err.to_string().contains("'password' is required"));
    }

    #[test]
    fn vtpm_requires_efi() {
        let mut opts = valid();
        opts.hardware.vtpm = true;
        assert!(opts.sanitize().is_err());
        opts.hardware.firmware = FirmwareMode::EfiSecure;
        opts.sanitize().unwrap();
    }

    #[test]
    fn sizing_policy_excludes_manual_shape() {
        let mut opts = valid();
        opts.hardware.vm_sizing_policy = "large".into();
        opts.hardware.cpus = 4;
        assert!(opts.sanitize().is_err());
    }

    #[test]
    fn manual_mode_needs_an_address() {
        let mut opts = valid();
        opts.network.ip_allocation_mode = IpAllocationMode::Manual;
        assert!(opts.sanitize().is_err());
        opts.network.vm_ip = Some(Ipv4Addr::new(10, 0, 0, 5));
        opts.sanitize().unwrap();
    }

    #[test]
    fn late_bind_selector() {
        let mut opts = valid();
        assert!(!opts.needs_late_bind());
        opts.network.auto_discover_ip = true;
        assert!(!opts.needs_late_bind());
        opts.image
            .cd_content
            .insert("ks.cfg".into(), "install".into());
        assert!(opts.needs_late_bind());
    }

    #[test]
    fn firmware_mode_folds_secure_into_efi() {
        assert_eq!(FirmwareMode::EfiSecure.firmware(), Firmware::Efi);
        assert!(FirmwareMode::EfiSecure.secure_boot());
        assert!(!FirmwareMode::Efi.secure_boot());
    }
}
