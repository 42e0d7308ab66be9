//! ISO-9660 reader.
//!
//! Parses the primary volume descriptor and directory hierarchy, including
//! the Rock Ridge system-use entries needed to recover long names (`NM`) and
//! symbolic-link targets (`SL`). Only what the image mutator needs is
//! implemented: listing, lookup, and whole-file extraction.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::errors::{ForgeError, ForgeResult};

pub const SECTOR_SIZE: usize = 2048;

/// Sector of the primary volume descriptor.
pub const PVD_SECTOR: u64 = 16;

/// One directory record, resolved to its Rock Ridge identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    /// Rock Ridge `SL` target, when the entry is a symbolic link.
    pub symlink: Option<String>,
    pub lba: u32,
    pub size: u32,
}

pub struct IsoReader {
    file: File,
    volume_id: String,
    root_lba: u32,
    root_size: u32,
}

impl IsoReader {
    pub fn open(path: &Path) -> ForgeResult<IsoReader> {
        let mut file = File::open(path).map_err(|e| {
            ForgeError::Image(format!("failed to open image {}: {e}", path.display()))
        })?;

        let pvd = read_sector(&mut file, PVD_SECTOR)?;
        if pvd[0] != 1 || &pvd[1..6] != b"CD001" {
            return Err(ForgeError::Image(format!(
                "{} is not an ISO-9660 image (no primary volume descriptor)",
                path.display()
            )));
        }

        let volume_id = String::from_utf8_lossy(&pvd[40..72]).trim().to_string();
        let root = &pvd[156..190];
        let root_lba = u32::from_le_bytes([root[2], root[3], root[4], root[5]]);
        let root_size = u32::from_le_bytes([root[10], root[11], root[12], root[13]]);

        Ok(IsoReader {
            file,
            volume_id,
            root_lba,
            root_size,
        })
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    pub fn root(&mut self) -> ForgeResult<Vec<DirEntry>> {
        self.list_extent(self.root_lba, self.root_size)
    }

    pub fn list_dir(&mut self, dir: &DirEntry) -> ForgeResult<Vec<DirEntry>> {
        if !dir.is_dir {
            return Err(ForgeError::Image(format!("{} is not a directory", dir.name)));
        }
        self.list_extent(dir.lba, dir.size)
    }

    pub fn read_file(&mut self, entry: &DirEntry) -> ForgeResult<Vec<u8>> {
        let mut data = vec![0u8; entry.size as usize];
        self.file
            .seek(SeekFrom::Start(u64::from(entry.lba) * SECTOR_SIZE as u64))?;
        self.file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Case-insensitive path lookup from the root.
    pub fn lookup(&mut self, path: &str) -> ForgeResult<Option<DirEntry>> {
        let mut entries = self.root()?;
        let mut found: Option<DirEntry> = None;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let Some(entry) = entries
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(part))
                .cloned()
            else {
                return Ok(None);
            };
            if entry.is_dir {
                entries = self.list_dir(&entry)?;
            } else {
                entries = Vec::new();
            }
            found = Some(entry);
        }
        Ok(found)
    }

    /// Depth-first walk of every entry, yielding slash-separated paths
    /// relative to the image root. Extents are tracked to survive
    /// self-referential link loops.
    pub fn walk(&mut self) -> ForgeResult<Vec<(String, DirEntry)>> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(self.root_lba);
        let root = self.root()?;
        self.walk_into(String::new(), root, &mut visited, &mut out)?;
        Ok(out)
    }

    fn walk_into(
        &mut self,
        prefix: String,
        entries: Vec<DirEntry>,
        visited: &mut HashSet<u32>,
        out: &mut Vec<(String, DirEntry)>,
    ) -> ForgeResult<()> {
        for entry in entries {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            if entry.is_dir && entry.symlink.is_none() {
                if visited.insert(entry.lba) {
                    let children = self.list_dir(&entry)?;
                    out.push((path.clone(), entry));
                    self.walk_into(path, children, visited, out)?;
                }
            } else {
                out.push((path, entry));
            }
        }
        Ok(())
    }

    fn list_extent(&mut self, lba: u32, size: u32) -> ForgeResult<Vec<DirEntry>> {
        let mut data = vec![0u8; size as usize];
        self.file
            .seek(SeekFrom::Start(u64::from(lba) * SECTOR_SIZE as u64))?;
        self.file.read_exact(&mut data)?;

        let mut entries = Vec::new();
        let mut off = 0usize;
        while off < data.len() {
            let rec_len = data[off] as usize;
            if rec_len == 0 {
                // Records do not span sectors; skip the padding.
                off = (off / SECTOR_SIZE + 1) * SECTOR_SIZE;
                continue;
            }
            if off + rec_len > data.len() {
                break;
            }
            if let Some(entry) = parse_record(&data[off..off + rec_len]) {
                entries.push(entry);
            }
            off += rec_len;
        }
        Ok(entries)
    }
}

fn read_sector(file: &mut File, sector: u64) -> ForgeResult<[u8; SECTOR_SIZE]> {
    let mut buf = [0u8; SECTOR_SIZE];
    file.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Parse one directory record; `None` for the `.` and `..` entries.
fn parse_record(rec: &[u8]) -> Option<DirEntry> {
    let name_len = rec[32] as usize;
    if name_len == 0 || 33 + name_len > rec.len() {
        return None;
    }
    let raw_name = &rec[33..33 + name_len];
    if raw_name == [0] || raw_name == [1] {
        return None;
    }

    let lba = u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]);
    let size = u32::from_le_bytes([rec[10], rec[11], rec[12], rec[13]]);
    let is_dir = rec[25] & 0x02 != 0;

    let identifier = decode_identifier(raw_name);

    // The system-use area follows the identifier, padded so it starts on an
    // even offset.
    let mut su_off = 33 + name_len;
    if name_len % 2 == 0 {
        su_off += 1;
    }
    let (rr_name, symlink) = parse_susp(&rec[su_off.min(rec.len())..]);

    Some(DirEntry {
        name: rr_name.unwrap_or(identifier),
        is_dir,
        symlink,
        lba,
        size,
    })
}

/// Strip the `;1` version suffix and any trailing dot from a plain ISO-9660
/// identifier.
fn decode_identifier(raw: &[u8]) -> String {
    let mut name = String::from_utf8_lossy(raw).to_string();
    if let Some(idx) = name.find(';') {
        name.truncate(idx);
    }
    if name.ends_with('.') {
        name.pop();
    }
    name
}

/// Scan SUSP entries for Rock Ridge `NM` and `SL`.
fn parse_susp(mut su: &[u8]) -> (Option<String>, Option<String>) {
    let mut name: Option<String> = None;
    let mut link_components: Vec<String> = Vec::new();
    let mut saw_sl = false;

    while su.len() >= 4 {
        let sig = &su[..2];
        let len = su[2] as usize;
        if len < 4 || len > su.len() {
            break;
        }
        let body = &su[4..len];
        match sig {
            b"NM" if body.len() > 1 => {
                let fragment = String::from_utf8_lossy(&body[1..]).to_string();
                match &mut name {
                    Some(existing) => existing.push_str(&fragment),
                    None => name = Some(fragment),
                }
            }
            b"SL" if !body.is_empty() => {
                saw_sl = true;
                let mut comps = &body[1..];
                while comps.len() >= 2 {
                    let flags = comps[0];
                    let clen = comps[1] as usize;
                    if 2 + clen > comps.len() {
                        break;
                    }
                    let comp = match flags & 0x0E {
                        0x02 => ".".to_string(),
                        0x04 => "..".to_string(),
                        0x08 => String::new(), // absolute: empty leading component
                        _ => String::from_utf8_lossy(&comps[2..2 + clen]).to_string(),
                    };
                    link_components.push(comp);
                    comps = &comps[2 + clen..];
                }
            }
            _ => {}
        }
        su = &su[len..];
    }

    let symlink = saw_sl.then(|| link_components.join("/"));
    (name, symlink)
}
