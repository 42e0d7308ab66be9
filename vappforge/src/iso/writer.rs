//! ISO-9660 writer.
//!
//! Emits a primary volume descriptor, L/M path tables, Rock Ridge directory
//! records (SP/PX/NM, plus SL for symbolic links), and an optional El-Torito
//! boot catalog with a platform-BIOS entry and a platform-EFI entry. Names
//! are carried in Rock Ridge; the plain ISO identifiers are 8.3 uppercase
//! with collision counters.

use std::collections::BTreeMap;

use crate::errors::{ForgeError, ForgeResult};
use crate::iso::reader::SECTOR_SIZE;

/// El-Torito platform ID of a BIOS entry.
pub const PLATFORM_BIOS: u8 = 0x00;
/// El-Torito platform ID of an EFI entry.
pub const PLATFORM_EFI: u8 = 0xEF;

/// Boot entry of the El-Torito catalog; always no-emulation.
#[derive(Debug, Clone)]
pub struct BootEntrySpec {
    /// Image path of the boot payload.
    pub path: String,
    /// Virtual-sector (512-byte) load count for the BIOS entry.
    pub load_sectors: u16,
}

#[derive(Debug, Clone)]
pub struct ElToritoSpec {
    /// Image path of the boot catalog itself.
    pub catalog_path: String,
    pub bios: Option<BootEntrySpec>,
    pub efi: Option<BootEntrySpec>,
}

enum Node {
    Dir(BTreeMap<String, Node>),
    File(Vec<u8>),
    Symlink(String),
}

pub struct IsoWriter {
    volume_id: String,
    root: BTreeMap<String, Node>,
    el_torito: Option<ElToritoSpec>,
}

impl IsoWriter {
    pub fn new(volume_id: &str) -> IsoWriter {
        IsoWriter {
            volume_id: volume_id.to_string(),
            root: BTreeMap::new(),
            el_torito: None,
        }
    }

    pub fn set_el_torito(&mut self, spec: ElToritoSpec) {
        self.el_torito = Some(spec);
    }

    pub fn add_file(&mut self, path: &str, content: Vec<u8>) -> ForgeResult<()> {
        self.insert(path, Node::File(content))
    }

    pub fn add_dir(&mut self, path: &str) -> ForgeResult<()> {
        self.dir_for(path).map(|_| ())
    }

    pub fn add_symlink(&mut self, path: &str, target: &str) -> ForgeResult<()> {
        self.insert(path, Node::Symlink(target.to_string()))
    }

    pub fn has_file(&self, path: &str) -> bool {
        let mut dir = &self.root;
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        for (i, part) in parts.iter().enumerate() {
            match dir.get(*part) {
                Some(Node::Dir(children)) => dir = children,
                Some(_) if i == parts.len() - 1 => return true,
                _ => return false,
            }
        }
        false
    }

    fn insert(&mut self, path: &str, node: Node) -> ForgeResult<()> {
        let (parent, leaf) = match path.trim_matches('/').rsplit_once('/') {
            Some((parent, leaf)) => (parent, leaf),
            None => ("", path.trim_matches('/')),
        };
        if leaf.is_empty() {
            return Err(ForgeError::Image(format!("invalid image path: {path:?}")));
        }
        let dir = self.dir_for(parent)?;
        dir.insert(leaf.to_string(), node);
        Ok(())
    }

    fn dir_for(&mut self, path: &str) -> ForgeResult<&mut BTreeMap<String, Node>> {
        let mut dir = &mut self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let entry = dir
                .entry(part.to_string())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            match entry {
                Node::Dir(children) => dir = children,
                _ => {
                    return Err(ForgeError::Image(format!(
                        "path component {part:?} is not a directory"
                    )))
                }
            }
        }
        Ok(dir)
    }

    /// Lay out and serialize the image.
    pub fn build(mut self) -> ForgeResult<Vec<u8>> {
        if let Some(spec) = &self.el_torito {
            let catalog_path = spec.catalog_path.clone();
            // One-sector placeholder, replacing any copied-in catalog so the
            // allocation matches; rewritten once boot-file extents are known.
            self.add_file(&catalog_path, vec![0u8; SECTOR_SIZE])?;
        }

        let mut layout = Layout::flatten(self.root)?;
        layout.assign_extents(self.el_torito.is_some())?;
        layout.serialize(&self.volume_id, self.el_torito.as_ref())
    }
}

struct FlatChild {
    name: String,
    ident: String,
    kind: ChildKind,
}

enum ChildKind {
    Dir(usize),
    File(usize),
    Symlink(String),
}

struct FlatDir {
    /// Index of the parent in `dirs`; the root points at itself.
    parent: usize,
    ident: String,
    children: Vec<FlatChild>,
    lba: u32,
    size: u32,
}

struct FlatFile {
    path: String,
    content: Vec<u8>,
    lba: u32,
}

/// The flattened, extent-assigned form of the tree.
struct Layout {
    dirs: Vec<FlatDir>,
    files: Vec<FlatFile>,
    total_sectors: u32,
    path_table: Vec<u8>,
    path_table_l_lba: u32,
    path_table_m_lba: u32,
    boot_catalog_lba: u32,
}

impl Layout {
    fn flatten(root: BTreeMap<String, Node>) -> ForgeResult<Layout> {
        let mut layout = Layout {
            dirs: Vec::new(),
            files: Vec::new(),
            total_sectors: 0,
            path_table: Vec::new(),
            path_table_l_lba: 0,
            path_table_m_lba: 0,
            boot_catalog_lba: 0,
        };
        layout.dirs.push(FlatDir {
            parent: 0,
            ident: String::new(),
            children: Vec::new(),
            lba: 0,
            size: 0,
        });
        // Breadth-first so path-table parent indices are already assigned.
        let mut queue = vec![(0usize, String::new(), root)];
        while let Some((dir_idx, dir_path, children)) = queue.pop() {
            let mut idents = IdentifierSet::new();
            let mut flat_children = Vec::new();
            for (name, node) in children {
                let child_path = if dir_path.is_empty() {
                    name.clone()
                } else {
                    format!("{dir_path}/{name}")
                };
                match node {
                    Node::Dir(grand_children) => {
                        let ident = idents.assign(&name, true);
                        let child_idx = layout.dirs.len();
                        layout.dirs.push(FlatDir {
                            parent: dir_idx,
                            ident: ident.clone(),
                            children: Vec::new(),
                            lba: 0,
                            size: 0,
                        });
                        flat_children.push(FlatChild {
                            name,
                            ident,
                            kind: ChildKind::Dir(child_idx),
                        });
                        queue.insert(0, (child_idx, child_path, grand_children));
                    }
                    Node::File(content) => {
                        let ident = idents.assign(&name, false);
                        let file_idx = layout.files.len();
                        layout.files.push(FlatFile {
                            path: child_path,
                            content,
                            lba: 0,
                        });
                        flat_children.push(FlatChild {
                            name,
                            ident,
                            kind: ChildKind::File(file_idx),
                        });
                    }
                    Node::Symlink(target) => {
                        let ident = idents.assign(&name, false);
                        flat_children.push(FlatChild {
                            name,
                            ident,
                            kind: ChildKind::Symlink(target),
                        });
                    }
                }
            }
            flat_children.sort_by(|a, b| a.ident.cmp(&b.ident));
            layout.dirs[dir_idx].children = flat_children;
        }
        Ok(layout)
    }

    fn assign_extents(&mut self, has_boot_record: bool) -> ForgeResult<()> {
        // Descriptors: PVD at 16, optional boot record, set terminator.
        let mut next = 16 + 1 + u32::from(has_boot_record) + 1;

        // Path table sizing requires directory identifiers only.
        let mut table_len = 0usize;
        for dir in &self.dirs {
            let id_len = if dir.ident.is_empty() { 1 } else { dir.ident.len() };
            table_len += 8 + id_len + id_len % 2;
        }
        let table_sectors = sectors(table_len as u32);
        self.path_table_l_lba = next;
        next += table_sectors;
        self.path_table_m_lba = next;
        next += table_sectors;

        // Directory sizes need a first pass before extents are final, but a
        // record's size does not depend on any LBA, so one sizing pass then
        // one assignment pass suffices.
        for i in 0..self.dirs.len() {
            self.dirs[i].size = self.directory_size(i)?;
        }
        for i in 0..self.dirs.len() {
            self.dirs[i].lba = next;
            next += sectors(self.dirs[i].size);
        }
        for file in &mut self.files {
            if file.content.len() > u32::MAX as usize {
                return Err(ForgeError::Image(format!(
                    "{} exceeds the 4 GiB ISO-9660 file limit",
                    file.path
                )));
            }
            file.lba = next;
            next += sectors(file.content.len() as u32);
        }
        self.total_sectors = next;
        Ok(())
    }

    /// Size in bytes of a directory extent, honouring the no-span rule.
    fn directory_size(&self, dir_idx: usize) -> ForgeResult<u32> {
        let dir = &self.dirs[dir_idx];
        // "." and ".."; the root's "." also carries the SUSP SP entry.
        let mut size = record_len(1, &dot_susp(dir_idx == 0))?;
        size += record_len(1, &[])?;
        let mut sector_used = size;
        for child in &dir.children {
            let susp = child_susp(child)?;
            let rec = record_len(child.ident.len(), &susp)?;
            if sector_used + rec > SECTOR_SIZE {
                size = size.div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
                sector_used = 0;
            }
            size += rec;
            sector_used += rec;
        }
        Ok(size as u32)
    }

    fn serialize(
        &mut self,
        volume_id: &str,
        el_torito: Option<&ElToritoSpec>,
    ) -> ForgeResult<Vec<u8>> {
        if let Some(spec) = el_torito {
            let catalog = self.build_boot_catalog(spec)?;
            let (catalog_lba, slot) = self.file_mut(&spec.catalog_path)?;
            slot.content = catalog;
            self.boot_catalog_lba = catalog_lba;
        }

        let mut image = vec![0u8; self.total_sectors as usize * SECTOR_SIZE];

        // Path tables first: the PVD records their size.
        self.write_path_tables(&mut image);
        self.write_pvd(&mut image, volume_id);
        if el_torito.is_some() {
            self.write_boot_record(&mut image);
        }
        let term_sector = if el_torito.is_some() { 18 } else { 17 };
        let term = &mut image[term_sector * SECTOR_SIZE..];
        term[0] = 255;
        term[1..6].copy_from_slice(b"CD001");
        term[6] = 1;

        for i in 0..self.dirs.len() {
            let extent = self.directory_extent(i)?;
            let start = self.dirs[i].lba as usize * SECTOR_SIZE;
            image[start..start + extent.len()].copy_from_slice(&extent);
        }

        for file in &self.files {
            let start = file.lba as usize * SECTOR_SIZE;
            image[start..start + file.content.len()].copy_from_slice(&file.content);
        }

        Ok(image)
    }

    fn file_index(&self, path: &str) -> ForgeResult<usize> {
        self.files
            .iter()
            .position(|f| f.path.eq_ignore_ascii_case(path.trim_matches('/')))
            .ok_or_else(|| ForgeError::Image(format!("boot file {path:?} not in image")))
    }

    fn file_mut(&mut self, path: &str) -> ForgeResult<(u32, &mut FlatFile)> {
        let idx = self.file_index(path)?;
        let lba = self.files[idx].lba;
        Ok((lba, &mut self.files[idx]))
    }

    fn build_boot_catalog(&self, spec: &ElToritoSpec) -> ForgeResult<Vec<u8>> {
        let mut catalog = vec![0u8; SECTOR_SIZE];

        // Validation entry: header 1, platform, checksum, 55 AA trailer. An
        // EFI-only image promotes EFI to the initial entry's platform.
        catalog[0] = 1;
        catalog[1] = if spec.bios.is_some() {
            PLATFORM_BIOS
        } else {
            PLATFORM_EFI
        };
        catalog[30] = 0x55;
        catalog[31] = 0xAA;
        let mut sum = 0u16;
        for i in (0..32).step_by(2) {
            sum = sum.wrapping_add(u16::from_le_bytes([catalog[i], catalog[i + 1]]));
        }
        catalog[28..30].copy_from_slice(&(0u16.wrapping_sub(sum)).to_le_bytes());

        let mut off = 32;
        if let Some(bios) = &spec.bios {
            let idx = self.file_index(&bios.path)?;
            write_boot_entry(
                &mut catalog[off..off + 32],
                bios.load_sectors,
                self.files[idx].lba,
            );
            off += 32;
        }
        if let Some(efi) = &spec.efi {
            if spec.bios.is_some() {
                // Final section header introducing the EFI entry.
                catalog[off] = 0x91;
                catalog[off + 1] = PLATFORM_EFI;
                catalog[off + 2..off + 4].copy_from_slice(&1u16.to_le_bytes());
                off += 32;
            }
            let idx = self.file_index(&efi.path)?;
            let virtual_sectors =
                u16::try_from(self.files[idx].content.len().div_ceil(512)).unwrap_or(u16::MAX);
            write_boot_entry(&mut catalog[off..off + 32], virtual_sectors, self.files[idx].lba);
        }

        Ok(catalog)
    }

    fn write_pvd(&self, image: &mut [u8], volume_id: &str) {
        let pvd = &mut image[16 * SECTOR_SIZE..17 * SECTOR_SIZE];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[6] = 1;
        pad_str(&mut pvd[8..40], "VAPPFORGE");
        pad_str(&mut pvd[40..72], volume_id);
        both_u32(&mut pvd[80..88], self.total_sectors);
        both_u16(&mut pvd[120..124], 1); // volume set size
        both_u16(&mut pvd[124..128], 1); // volume sequence number
        both_u16(&mut pvd[128..132], SECTOR_SIZE as u16);
        both_u32(&mut pvd[132..140], self.path_table.len() as u32);
        pvd[140..144].copy_from_slice(&self.path_table_l_lba.to_le_bytes());
        pvd[148..152].copy_from_slice(&self.path_table_m_lba.to_be_bytes());

        let root = &self.dirs[0];
        let record = directory_record(&[0], root.lba, root.size, true, &[]);
        pvd[156..156 + record.len()].copy_from_slice(&record);

        pad_str(&mut pvd[190..318], ""); // volume set identifier
        pad_str(&mut pvd[318..446], ""); // publisher
        pad_str(&mut pvd[446..574], ""); // data preparer
        pad_str(&mut pvd[574..702], "VAPPFORGE");
        pvd[881] = 1; // file structure version
    }

    fn write_boot_record(&self, image: &mut [u8]) {
        let rec = &mut image[17 * SECTOR_SIZE..18 * SECTOR_SIZE];
        rec[0] = 0;
        rec[1..6].copy_from_slice(b"CD001");
        rec[6] = 1;
        let spec = b"EL TORITO SPECIFICATION";
        rec[7..7 + spec.len()].copy_from_slice(spec);
        rec[71..75].copy_from_slice(&self.boot_catalog_lba.to_le_bytes());
    }

    fn write_path_tables(&mut self, image: &mut [u8]) {
        let mut l_table = Vec::new();
        let mut m_table = Vec::new();
        for dir in &self.dirs {
            let ident: &[u8] = if dir.ident.is_empty() {
                &[0]
            } else {
                dir.ident.as_bytes()
            };
            let parent = dir.parent as u16 + 1;
            for (table, le) in [(&mut l_table, true), (&mut m_table, false)] {
                table.push(ident.len() as u8);
                table.push(0);
                if le {
                    table.extend_from_slice(&dir.lba.to_le_bytes());
                    table.extend_from_slice(&parent.to_le_bytes());
                } else {
                    table.extend_from_slice(&dir.lba.to_be_bytes());
                    table.extend_from_slice(&parent.to_be_bytes());
                }
                table.extend_from_slice(ident);
                if ident.len() % 2 == 1 {
                    table.push(0);
                }
            }
        }
        let l_start = self.path_table_l_lba as usize * SECTOR_SIZE;
        image[l_start..l_start + l_table.len()].copy_from_slice(&l_table);
        let m_start = self.path_table_m_lba as usize * SECTOR_SIZE;
        image[m_start..m_start + m_table.len()].copy_from_slice(&m_table);
        self.path_table = l_table;
    }

    fn directory_extent(&self, dir_idx: usize) -> ForgeResult<Vec<u8>> {
        let dir = &self.dirs[dir_idx];
        let parent = &self.dirs[dir.parent];
        let mut extent = Vec::with_capacity(dir.size as usize);

        extent.extend_from_slice(&directory_record(
            &[0],
            dir.lba,
            dir.size,
            true,
            &dot_susp(dir_idx == 0),
        ));
        extent.extend_from_slice(&directory_record(&[1], parent.lba, parent.size, true, &[]));

        for child in &dir.children {
            let susp = child_susp(child)?;
            let (lba, size, is_dir) = match &child.kind {
                ChildKind::Dir(idx) => (self.dirs[*idx].lba, self.dirs[*idx].size, true),
                ChildKind::File(idx) => (
                    self.files[*idx].lba,
                    self.files[*idx].content.len() as u32,
                    false,
                ),
                ChildKind::Symlink(_) => (0, 0, false),
            };
            let record = directory_record(child.ident.as_bytes(), lba, size, is_dir, &susp);
            let used = extent.len() % SECTOR_SIZE;
            if used + record.len() > SECTOR_SIZE {
                extent.resize(extent.len() + SECTOR_SIZE - used, 0);
            }
            extent.extend_from_slice(&record);
        }
        Ok(extent)
    }
}

/// Identifier allocation within one directory: 8.3 uppercase with collision
/// counters.
struct IdentifierSet {
    taken: std::collections::HashSet<String>,
}

impl IdentifierSet {
    fn new() -> IdentifierSet {
        IdentifierSet {
            taken: std::collections::HashSet::new(),
        }
    }

    fn assign(&mut self, name: &str, is_dir: bool) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c.to_ascii_uppercase()
                } else if c == '.' && !is_dir {
                    '.'
                } else {
                    '_'
                }
            })
            .collect();

        let (base, ext) = if is_dir {
            (sanitized.as_str(), "")
        } else {
            match sanitized.rsplit_once('.') {
                Some((b, e)) if !b.is_empty() => (b, e),
                _ => (sanitized.as_str(), ""),
            }
        };
        let base: String = base.chars().filter(|c| *c != '.').take(8).collect();
        let ext: String = ext.chars().take(3).collect();

        for counter in 0u32.. {
            let mut candidate_base = base.clone();
            if counter > 0 {
                let tag = counter.to_string();
                let keep = 8usize.saturating_sub(tag.len());
                candidate_base = base.chars().take(keep).collect::<String>() + &tag;
            }
            if candidate_base.is_empty() {
                candidate_base = "_".into();
            }
            let candidate = if is_dir {
                candidate_base
            } else if ext.is_empty() {
                format!("{candidate_base};1")
            } else {
                format!("{candidate_base}.{ext};1")
            };
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
        unreachable!("identifier space exhausted")
    }
}

/// One no-emulation boot entry: bootable marker, load segment 0 (the BIOS
/// default of 0x7C0), virtual-sector count, and the payload's LBA.
fn write_boot_entry(dst: &mut [u8], sector_count: u16, lba: u32) {
    dst[0] = 0x88;
    dst[1] = 0; // no emulation
    dst[6..8].copy_from_slice(&sector_count.to_le_bytes());
    dst[8..12].copy_from_slice(&lba.to_le_bytes());
}

fn sectors(bytes: u32) -> u32 {
    bytes.div_ceil(SECTOR_SIZE as u32)
}

fn pad_str(dst: &mut [u8], value: &str) {
    dst.fill(b' ');
    let bytes = value.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn both_u16(dst: &mut [u8], value: u16) {
    dst[0..2].copy_from_slice(&value.to_le_bytes());
    dst[2..4].copy_from_slice(&value.to_be_bytes());
}

fn both_u32(dst: &mut [u8], value: u32) {
    dst[0..4].copy_from_slice(&value.to_le_bytes());
    dst[4..8].copy_from_slice(&value.to_be_bytes());
}

fn record_len(ident_len: usize, susp: &[u8]) -> ForgeResult<usize> {
    let mut len = 33 + ident_len;
    if ident_len % 2 == 0 {
        len += 1;
    }
    len += susp.len();
    if len > 255 {
        return Err(ForgeError::Image(
            "directory record too large; name exceeds the supported length".into(),
        ));
    }
    Ok(len)
}

fn directory_record(ident: &[u8], lba: u32, size: u32, is_dir: bool, susp: &[u8]) -> Vec<u8> {
    let mut len = 33 + ident.len();
    if ident.len() % 2 == 0 {
        len += 1;
    }
    len += susp.len();

    let mut rec = vec![0u8; len];
    rec[0] = len as u8;
    both_u32(&mut rec[2..10], lba);
    both_u32(&mut rec[10..18], size);
    // Recording timestamp; fixed so output is deterministic.
    rec[18..25].copy_from_slice(&[125, 1, 1, 0, 0, 0, 0]);
    rec[25] = if is_dir { 0x02 } else { 0x00 };
    both_u16(&mut rec[28..32], 1);
    rec[32] = ident.len() as u8;
    rec[33..33 + ident.len()].copy_from_slice(ident);
    let susp_off = len - susp.len();
    rec[susp_off..].copy_from_slice(susp);
    rec
}

/// SUSP area of a "." entry; the root's carries the SP marker.
fn dot_susp(is_root: bool) -> Vec<u8> {
    if is_root {
        vec![b'S', b'P', 7, 1, 0xBE, 0xEF, 0]
    } else {
        Vec::new()
    }
}

fn child_susp(child: &FlatChild) -> ForgeResult<Vec<u8>> {
    let mut susp = Vec::new();
    susp.extend_from_slice(&px_entry(child));
    susp.extend_from_slice(&nm_entry(&child.name));
    if let ChildKind::Symlink(target) = &child.kind {
        susp.extend_from_slice(&sl_entry(target)?);
    }
    Ok(susp)
}

fn px_entry(child: &FlatChild) -> [u8; 36] {
    let (mode, links) = match &child.kind {
        ChildKind::Dir(_) => (0o040555u32, 2u32),
        ChildKind::File(_) => (0o100444, 1),
        ChildKind::Symlink(_) => (0o120777, 1),
    };
    let mut px = [0u8; 36];
    px[0] = b'P';
    px[1] = b'X';
    px[2] = 36;
    px[3] = 1;
    both_u32(&mut px[4..12], mode);
    both_u32(&mut px[12..20], links);
    both_u32(&mut px[20..28], 0); // uid
    both_u32(&mut px[28..36], 0); // gid
    px
}

fn nm_entry(name: &str) -> Vec<u8> {
    let mut nm = Vec::with_capacity(5 + name.len());
    nm.extend_from_slice(&[b'N', b'M', (5 + name.len()) as u8, 1, 0]);
    nm.extend_from_slice(name.as_bytes());
    nm
}

fn sl_entry(target: &str) -> ForgeResult<Vec<u8>> {
    let mut components = Vec::new();
    if let Some(rest) = target.strip_prefix('/') {
        components.push(vec![0x08u8, 0]);
        for part in rest.split('/').filter(|p| !p.is_empty()) {
            components.push(component(part));
        }
    } else {
        for part in target.split('/').filter(|p| !p.is_empty()) {
            components.push(component(part));
        }
    }
    let body_len: usize = components.iter().map(|c| c.len()).sum();
    let len = 5 + body_len;
    if len > 250 {
        return Err(ForgeError::Image(format!(
            "symlink target too long: {target:?}"
        )));
    }
    let mut sl = Vec::with_capacity(len);
    sl.extend_from_slice(&[b'S', b'L', len as u8, 1, 0]);
    for c in components {
        sl.extend_from_slice(&c);
    }
    Ok(sl)
}

fn component(part: &str) -> Vec<u8> {
    match part {
        "." => vec![0x02, 0],
        ".." => vec![0x04, 0],
        _ => {
            let mut c = Vec::with_capacity(2 + part.len());
            c.push(0);
            c.push(part.len() as u8);
            c.extend_from_slice(part.as_bytes());
            c
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iso::reader::IsoReader;

    fn read_back(image: Vec<u8>) -> (tempfile::TempDir, IsoReader) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.iso");
        std::fs::write(&path, image).unwrap();
        let reader = IsoReader::open(&path).unwrap();
        (dir, reader)
    }

    #[test]
    fn writes_a_tree_the_reader_can_walk() {
        let mut writer = IsoWriter::new("UNIT");
        writer.add_file("top.txt", b"top".to_vec()).unwrap();
        writer
            .add_file("a/deeply/nested/path/file.bin", vec![9u8; 3000])
            .unwrap();
        writer.add_dir("empty").unwrap();
        writer
            .add_file("a/long-name-with.many.dots.and-dashes.txt", b"x".to_vec())
            .unwrap();

        let (_dir, mut reader) = read_back(writer.build().unwrap());
        assert_eq!(reader.volume_id(), "UNIT");

        let entry = reader.lookup("top.txt").unwrap().unwrap();
        assert_eq!(reader.read_file(&entry).unwrap(), b"top");

        let entry = reader
            .lookup("a/deeply/nested/path/file.bin")
            .unwrap()
            .unwrap();
        assert_eq!(entry.size, 3000);
        assert_eq!(reader.read_file(&entry).unwrap(), vec![9u8; 3000]);

        let empty = reader.lookup("empty").unwrap().unwrap();
        assert!(empty.is_dir);
        assert!(reader.list_dir(&empty).unwrap().is_empty());

        // Rock Ridge carries the original name despite the 8.3 identifier.
        let entry = reader
            .lookup("a/long-name-with.many.dots.and-dashes.txt")
            .unwrap()
            .unwrap();
        assert_eq!(entry.name, "long-name-with.many.dots.and-dashes.txt");
    }

    #[test]
    fn colliding_identifiers_stay_distinct() {
        let mut writer = IsoWriter::new("UNIT");
        writer
            .add_file("configuration-alpha.cfg", b"alpha".to_vec())
            .unwrap();
        writer
            .add_file("configuration-bravo.cfg", b"bravo".to_vec())
            .unwrap();

        let (_dir, mut reader) = read_back(writer.build().unwrap());
        let a = reader.lookup("configuration-alpha.cfg").unwrap().unwrap();
        let b = reader.lookup("configuration-bravo.cfg").unwrap().unwrap();
        assert_ne!(a.lba, b.lba);
        assert_eq!(reader.read_file(&a).unwrap(), b"alpha");
        assert_eq!(reader.read_file(&b).unwrap(), b"bravo");
    }

    #[test]
    fn symlink_targets_round_trip() {
        let mut writer = IsoWriter::new("UNIT");
        writer.add_file("real/file", b"data".to_vec()).unwrap();
        writer.add_symlink("rel", "real/file").unwrap();
        writer.add_symlink("up", "../real/file").unwrap();
        writer.add_symlink("abs", "/real/file").unwrap();

        let (_dir, mut reader) = read_back(writer.build().unwrap());
        let by_name = |reader: &mut IsoReader, name: &str| {
            reader.lookup(name).unwrap().unwrap().symlink.unwrap()
        };
        assert_eq!(by_name(&mut reader, "rel"), "real/file");
        assert_eq!(by_name(&mut reader, "up"), "../real/file");
        assert_eq!(by_name(&mut reader, "abs"), "/real/file");
    }

    #[test]
    fn many_entries_spill_across_directory_sectors() {
        let mut writer = IsoWriter::new("UNIT");
        for i in 0..80 {
            writer
                .add_file(&format!("spill/file-number-{i:03}.dat"), vec![i as u8; 10])
                .unwrap();
        }
        let (_dir, mut reader) = read_back(writer.build().unwrap());
        let spill = reader.lookup("spill").unwrap().unwrap();
        assert!(spill.size as usize > SECTOR_SIZE);
        let entries = reader.list_dir(&spill).unwrap();
        assert_eq!(entries.len(), 80);
        for i in [0usize, 41, 79] {
            let entry = reader
                .lookup(&format!("spill/file-number-{i:03}.dat"))
                .unwrap()
                .unwrap();
            assert_eq!(reader.read_file(&entry).unwrap(), vec![i as u8; 10]);
        }
    }

    #[test]
    fn overlong_names_are_rejected_not_truncated() {
        let mut writer = IsoWriter::new("UNIT");
        let name = "x".repeat(300);
        writer.add_file(&name, b"y".to_vec()).unwrap();
        assert!(writer.build().is_err());
    }
}
