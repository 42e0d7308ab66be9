//! Optical-image mutation: ISO-9660 reading and re-mastering, El-Torito boot
//! preservation, boot-info-table patching, and the external UDF rebuild
//! path.

pub mod boot_info;
pub mod detect;
pub mod modifier;
pub mod reader;
pub mod rebuild;
pub mod writer;

pub use detect::{BiosBoot, BootProfile};
pub use modifier::{checksum_file, IsoModifier};
pub use reader::IsoReader;
pub use writer::IsoWriter;

/// Boot-catalog path used when re-mastering ISO-9660 images natively. The
/// external UDF rebuild names its catalog `boot.cat`.
pub const BOOT_CATALOG_NAME: &str = "boot.catalog";
