//! Boot-info-table patching.
//!
//! isolinux locates itself through a 56-byte table at offset 8 of its boot
//! image. The image writer lays the payload down verbatim, so after
//! finalize the table must be rewritten for the payload's position in the
//! new image:
//!
//! - `bi_pvd`    (offset  8, u32le): LBA of the primary volume descriptor
//! - `bi_file`   (offset 12, u32le): LBA of the boot file
//! - `bi_length` (offset 16, u32le): boot file length in bytes
//! - `bi_csum`   (offset 20, u32le): sum of u32le words from offset 64 to EOF
//!
//! The 32 bytes at offsets 24-55 stay zero. The boot file's LBA comes from
//! the El-Torito catalog at sector 17; its byte length comes from the
//! directory records, because the catalog's sector count only covers what
//! the firmware loads.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::errors::{ForgeError, ForgeResult};
use crate::iso::reader::SECTOR_SIZE;

const PVD_LBA: u32 = 16;
const BOOT_RECORD_SECTOR: u64 = 17;

/// Patch the boot-info-table of `boot_path` inside the image at `iso_path`.
pub fn patch(iso_path: &Path, boot_path: &str) -> ForgeResult<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(iso_path)
        .map_err(|e| {
            ForgeError::Image(format!(
                "failed to open {} for patching: {e}",
                iso_path.display()
            ))
        })?;

    let (lba, length) = find_boot_file(&mut file, boot_path)?;

    let offset = u64::from(lba) * SECTOR_SIZE as u64;
    let mut image = vec![0u8; length as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut image)?;

    let mut checksum = 0u32;
    let mut i = 64;
    while i + 4 <= image.len() {
        checksum = checksum.wrapping_add(u32::from_le_bytes([
            image[i],
            image[i + 1],
            image[i + 2],
            image[i + 3],
        ]));
        i += 4;
    }

    tracing::debug!(lba, length, checksum = %format_args!("{checksum:#010x}"), "boot-info-table");

    image[8..12].copy_from_slice(&PVD_LBA.to_le_bytes());
    image[12..16].copy_from_slice(&lba.to_le_bytes());
    image[16..20].copy_from_slice(&length.to_le_bytes());
    image[20..24].copy_from_slice(&checksum.to_le_bytes());

    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&image)?;
    Ok(())
}

/// LBA (from the El-Torito catalog) and byte length (from the directory
/// records) of the default boot file.
fn find_boot_file(file: &mut std::fs::File, boot_path: &str) -> ForgeResult<(u32, u32)> {
    let mut record = [0u8; SECTOR_SIZE];
    file.seek(SeekFrom::Start(BOOT_RECORD_SECTOR * SECTOR_SIZE as u64))?;
    file.read_exact(&mut record)?;

    if record[0] != 0 || &record[1..6] != b"CD001" {
        return Err(ForgeError::Image("no El-Torito boot record at sector 17".into()));
    }

    let catalog_lba = u32::from_le_bytes([record[71], record[72], record[73], record[74]]);
    let mut catalog = [0u8; SECTOR_SIZE];
    file.seek(SeekFrom::Start(u64::from(catalog_lba) * SECTOR_SIZE as u64))?;
    file.read_exact(&mut catalog)?;

    if catalog[0] != 1 {
        return Err(ForgeError::Image("invalid boot-catalog validation entry".into()));
    }
    let default_entry = &catalog[32..64];
    if default_entry[0] != 0x88 {
        return Err(ForgeError::Image("default boot entry is not bootable".into()));
    }
    let lba = u32::from_le_bytes([
        default_entry[8],
        default_entry[9],
        default_entry[10],
        default_entry[11],
    ]);

    // The catalog's sector count understates real payload size (isolinux is
    // tens of kilobytes; the entry loads four virtual sectors), so walk the
    // directory records for the true length.
    let length = match find_file_size(file, boot_path)? {
        Some(len) => len,
        None => {
            let sector_count =
                u16::from_le_bytes([default_entry[6], default_entry[7]]) as u32;
            let mut len = sector_count * 512;
            if len < 2048 {
                // The entry only covers what the firmware loads; a plausible
                // isolinux payload size beats a four-sector truncation.
                len = 64 * 1024;
            }
            len
        }
    };

    Ok((lba, length))
}

/// Byte length of `path` by walking plain directory records from the PVD
/// root. Identifier comparison mirrors the mastering side: version suffix
/// and trailing dot stripped, case-insensitive.
fn find_file_size(file: &mut std::fs::File, path: &str) -> ForgeResult<Option<u32>> {
    let mut pvd = [0u8; SECTOR_SIZE];
    file.seek(SeekFrom::Start(u64::from(PVD_LBA) * SECTOR_SIZE as u64))?;
    file.read_exact(&mut pvd)?;

    let root = &pvd[156..190];
    let mut dir_lba = u32::from_le_bytes([root[2], root[3], root[4], root[5]]);
    let mut dir_len = u32::from_le_bytes([root[10], root[11], root[12], root[13]]);

    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    for (i, part) in parts.iter().enumerate() {
        let is_last = i == parts.len() - 1;
        let mut data = vec![0u8; dir_len as usize];
        file.seek(SeekFrom::Start(u64::from(dir_lba) * SECTOR_SIZE as u64))?;
        file.read_exact(&mut data)?;

        let mut found = false;
        let mut off = 0usize;
        while off < data.len() {
            let rec_len = data[off] as usize;
            if rec_len == 0 {
                off = (off / SECTOR_SIZE + 1) * SECTOR_SIZE;
                continue;
            }
            if off + rec_len > data.len() {
                break;
            }
            let rec = &data[off..off + rec_len];
            off += rec_len;

            let name_len = rec[32] as usize;
            if name_len == 0 || 33 + name_len > rec.len() {
                continue;
            }
            let mut name = String::from_utf8_lossy(&rec[33..33 + name_len]).to_string();
            if let Some(idx) = name.find(';') {
                name.truncate(idx);
            }
            if name.ends_with('.') {
                name.pop();
            }
            if !name.eq_ignore_ascii_case(part) {
                continue;
            }

            let size = u32::from_le_bytes([rec[10], rec[11], rec[12], rec[13]]);
            if is_last {
                return Ok(Some(size));
            }
            dir_lba = u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]);
            dir_len = size;
            found = true;
            break;
        }

        if !found {
            return Ok(None);
        }
    }

    Ok(None)
}
