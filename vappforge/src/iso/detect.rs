//! Source-image classification and boot-payload detection.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::errors::{ForgeError, ForgeResult};
use crate::iso::reader::{IsoReader, SECTOR_SIZE};

/// BIOS candidates, first match wins. Windows' etfsboot loads 8 virtual
/// sectors; isolinux-style payloads load 4 and need the boot-info-table
/// patched after the image is written.
const BIOS_CANDIDATES: &[(&str, u16, bool)] = &[
    ("boot/etfsboot.com", 8, false),
    ("isolinux/isolinux.bin", 4, true),
    ("syslinux/syslinux.bin", 4, true),
    ("boot/isolinux/isolinux.bin", 4, true),
];

const UEFI_CANDIDATES: &[&str] = &[
    "efi/microsoft/boot/efisys.bin",
    "efi/microsoft/boot/efisys_noprompt.bin",
    "boot/grub/efi.img",
    "boot/grub/x86_64-efi/grub.efi",
    "EFI/BOOT/BOOTX64.EFI",
];

/// The BIOS half of a boot profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosBoot {
    /// Image path of the payload, as found in the source.
    pub path: String,
    /// Virtual 512-byte sectors loaded by the firmware.
    pub load_sectors: u16,
    /// isolinux-style payloads carry a boot-info-table that must be patched
    /// to the payload's location in the new image.
    pub needs_boot_info_table: bool,
}

/// What the source image boots, and its volume identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootProfile {
    pub bios: Option<BiosBoot>,
    /// Image path of the UEFI payload.
    pub uefi: Option<String>,
    pub volume_id: String,
}

impl BootProfile {
    pub fn is_bootable(&self) -> bool {
        self.bios.is_some() || self.uefi.is_some()
    }
}

/// Whether the image carries a UDF volume-recognition sequence. UDF means a
/// Windows-style dual-format image that must go through the external
/// extract-and-rebuild path.
pub fn probe_udf(path: &Path) -> ForgeResult<bool> {
    let mut file = File::open(path).map_err(|e| {
        ForgeError::Image(format!("failed to open image {}: {e}", path.display()))
    })?;

    let mut buf = [0u8; SECTOR_SIZE];
    for sector in 16..=20u64 {
        if file
            .seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))
            .and_then(|_| file.read_exact(&mut buf))
            .is_err()
        {
            continue;
        }
        match &buf[1..6] {
            b"BEA01" | b"NSR02" | b"NSR03" | b"TEA01" => return Ok(true),
            _ => {}
        }
    }
    Ok(false)
}

/// Volume identifier from the primary volume descriptor; `DISK` when the
/// image has none we can read.
pub fn volume_id(path: &Path) -> String {
    match IsoReader::open(path) {
        Ok(reader) if !reader.volume_id().is_empty() => reader.volume_id().to_string(),
        _ => "DISK".to_string(),
    }
}

/// Locate the boot payloads of an ISO-9660 source. Path comparisons are
/// case-insensitive.
pub fn detect_boot(reader: &mut IsoReader) -> ForgeResult<BootProfile> {
    let mut profile = BootProfile {
        volume_id: reader.volume_id().to_string(),
        ..Default::default()
    };

    for (candidate, load_sectors, needs_table) in BIOS_CANDIDATES {
        if matches!(reader.lookup(candidate)?, Some(entry) if !entry.is_dir) {
            profile.bios = Some(BiosBoot {
                path: (*candidate).to_string(),
                load_sectors: *load_sectors,
                needs_boot_info_table: *needs_table,
            });
            break;
        }
    }

    for candidate in UEFI_CANDIDATES {
        if matches!(reader.lookup(candidate)?, Some(entry) if !entry.is_dir) {
            profile.uefi = Some((*candidate).to_string());
            break;
        }
    }

    Ok(profile)
}
