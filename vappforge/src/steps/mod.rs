//! Pipeline stages.
//!
//! Each stage owns its slice of the build state and its own retries; the
//! coordinator never retries a whole stage. Cleanup order is the reverse of
//! registration, and every cleanup checks the ownership flags before
//! touching a resource.

pub mod boot_command;
pub mod boot_options;
pub mod catalog;
pub mod communicator;
pub mod connect;
pub mod create_vm;
pub mod discover_ip;
pub mod download;
pub mod export;
pub mod hardware;
pub mod http_server;
pub mod modify_iso;
pub mod mount_iso;
pub mod power_on;
pub mod query_vm_ip;
pub mod resolve_vapp;
pub mod shutdown;
pub mod tpm;
pub mod upload_iso;
pub mod wait_for_ip;
