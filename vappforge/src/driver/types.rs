//! Value types exchanged with the cloud driver.

use std::net::Ipv4Addr;

/// API version every driver implementation is expected to negotiate.
pub const VCD_API_VERSION: &str = "38.1";

/// Media type of the MKS ticket request/response body.
pub const MKS_TICKET_MEDIA_TYPE: &str = "application/vnd.vmware.vcloud.mksticket+xml";

/// Media uploads are streamed in pieces of this size.
pub const UPLOAD_PIECE_SIZE: usize = 10 * 1024 * 1024;

/// Status value of a media object that has fully settled on its storage.
pub const MEDIA_STATUS_RESOLVED: i32 = 1;

/// Status value of a vApp template that is ready for instantiation.
pub const TEMPLATE_STATUS_READY: i32 = 8;

/// A virtual datacenter handle, with its storage profiles resolved so the
/// catalog step can pick the first one without another round trip.
#[derive(Debug, Clone)]
pub struct Vdc {
    pub name: String,
    pub href: String,
    pub storage_profiles: Vec<StorageProfileRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageProfileRef {
    pub name: String,
    pub href: String,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub name: String,
    pub href: String,
}

#[derive(Debug, Clone)]
pub struct Vapp {
    pub name: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizingPolicyRef {
    pub name: String,
    pub id: String,
}

/// An inclusive IPv4 range from a network's static pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

/// The first IP scope of an org VDC network.
#[derive(Debug, Clone)]
pub struct NetworkScope {
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
    pub ranges: Vec<IpRange>,
    /// Addresses the cloud reports as allocated. This does not include
    /// MANUAL allocations in use on existing NICs; see `Driver::used_ips`.
    pub allocated: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IpAllocationMode {
    Pool,
    Dhcp,
    Manual,
    None,
}

impl Default for IpAllocationMode {
    fn default() -> Self {
        IpAllocationMode::Pool
    }
}

/// Firmware value sent to the cloud. `efi-secure` in the configuration
/// surface maps to `Efi` here plus the secure-boot flag in boot options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    Bios,
    Efi,
}

impl Firmware {
    pub fn as_str(&self) -> &'static str {
        match self {
            Firmware::Bios => "bios",
            Firmware::Efi => "efi",
        }
    }
}

/// NIC settings for the empty-VM descriptor.
#[derive(Debug, Clone)]
pub struct VmNetworkSpec {
    pub network: String,
    pub allocation_mode: IpAllocationMode,
    /// Only meaningful in MANUAL mode.
    pub ip: Option<Ipv4Addr>,
    pub adapter_type: String,
}

/// The empty-VM descriptor. CPU and memory carry creation-time defaults and
/// are reshaped by the hardware step afterwards.
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub description: String,
    /// Guest hostname; callers truncate to the 15 characters the guest
    /// customization accepts.
    pub computer_name: String,
    pub guest_os_type: String,
    pub firmware: Firmware,
    pub hardware_version: String,
    pub cpus: u32,
    pub cores_per_socket: u32,
    pub memory_mb: u64,
    /// Primary disk size; thin provisioned on the LSI-SAS controller.
    pub disk_size_mb: u64,
    pub storage_profile: Option<StorageProfileRef>,
    pub network: Option<VmNetworkSpec>,
}

/// A console ticket returned by the cloud. Valid for roughly thirty seconds
/// and usable exactly once.
#[derive(Debug, Clone)]
pub struct MksTicket {
    pub host: String,
    pub port: u16,
    pub ticket: String,
    pub vmx: Option<String>,
}

impl MksTicket {
    /// The console proxy URL: `wss://{host}:{port}/{port};{ticket}`. The port
    /// appears twice and the ticket keeps its leading slash.
    pub fn websocket_url(&self) -> String {
        let (host, mut port) = match self.host.split_once(':') {
            Some((h, p)) => (h, p.parse::<u16>().unwrap_or(self.port)),
            None => (self.host.as_str(), self.port),
        };
        if port == 0 {
            port = 443;
        }
        let ticket = if self.ticket.starts_with('/') {
            self.ticket.clone()
        } else {
            format!("/{}", self.ticket)
        };
        format!("wss://{host}:{port}/{port};{ticket}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_repeats_port_and_prefixes_ticket() {
        let ticket = MksTicket {
            host: "console.example.com".into(),
            port: 8443,
            ticket: "cst-ABC--tp-XYZ--".into(),
            vmx: None,
        };
        assert_eq!(
            ticket.websocket_url(),
            "wss://console.example.com:8443/8443;/cst-ABC--tp-XYZ--"
        );
    }

    #[test]
    fn websocket_url_splits_port_from_host() {
        let ticket = MksTicket {
            host: "console.example.com:9443".into(),
            port: 0,
            ticket: "/cst-1".into(),
            vmx: None,
        };
        assert_eq!(
            ticket.websocket_url(),
            "wss://console.example.com:9443/9443;/cst-1"
        );
    }

    #[test]
    fn websocket_url_defaults_to_443() {
        let ticket = MksTicket {
            host: "console.example.com".into(),
            port: 0,
            ticket: "/cst-1".into(),
            vmx: None,
        };
        assert_eq!(ticket.websocket_url(), "wss://console.example.com:443/443;/cst-1");
    }
}
