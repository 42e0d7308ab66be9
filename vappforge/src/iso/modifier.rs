//! Installer-image mutation.
//!
//! The cloud exposes a single optical slot per VM, so answer files must ride
//! on the installer image itself. The modifier rewrites the source with the
//! injected files while preserving bootability: the ISO-9660 path re-masters
//! natively with the detected El-Torito entries and patches the
//! boot-info-table; the UDF path goes through the external rebuilder.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::errors::{ForgeError, ForgeResult};
use crate::iso::detect::{self, BootProfile};
use crate::iso::reader::{DirEntry, IsoReader};
use crate::iso::rebuild::{ImageRebuilder, RebuildRequest};
use crate::iso::writer::{BootEntrySpec, ElToritoSpec, IsoWriter};
use crate::iso::{boot_info, BOOT_CATALOG_NAME};

/// Release codenames tried when materializing Debian-style suite links.
const SUITE_CODENAMES: &[&str] = &[
    "bookworm", "bullseye", "buster", "stretch", "jessie", "trixie", "forky", "sid", "noble",
    "jammy", "focal", "bionic",
];

pub struct IsoModifier {
    source: PathBuf,
    files: BTreeMap<String, Vec<u8>>,
    symlink_targets: BTreeMap<String, String>,
    rebuilder: Arc<dyn ImageRebuilder>,
    /// Proceed without boot entries when the source has none we recognize.
    allow_unbootable: bool,
}

impl IsoModifier {
    pub fn new(source: &Path, rebuilder: Arc<dyn ImageRebuilder>) -> IsoModifier {
        IsoModifier {
            source: source.to_path_buf(),
            files: BTreeMap::new(),
            symlink_targets: BTreeMap::new(),
            rebuilder,
            allow_unbootable: true,
        }
    }

    /// Caller-supplied symlink resolution, taking precedence over the
    /// heuristics.
    pub fn set_symlink_targets(&mut self, targets: BTreeMap<String, String>) {
        self.symlink_targets = targets;
    }

    pub fn allow_unbootable(&mut self, allow: bool) {
        self.allow_unbootable = allow;
    }

    /// Queue `content` for `path` (forward-slash, relative to the image
    /// root). Collisions with source files replace the original.
    pub fn add_content(&mut self, path: &str, content: Vec<u8>) {
        let path = path.trim_start_matches('/').replace('\\', "/");
        self.files.insert(path, content);
    }

    /// Queue a local file at `iso_path`.
    pub fn add_file(&mut self, iso_path: &str, local: &Path) -> ForgeResult<()> {
        let content = std::fs::read(local).map_err(|e| {
            ForgeError::Image(format!("failed to read {}: {e}", local.display()))
        })?;
        self.add_content(iso_path, content);
        Ok(())
    }

    /// Queue a local directory under its base name at the image root.
    pub fn add_tree(&mut self, local: &Path) -> ForgeResult<()> {
        let base = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                ForgeError::Image(format!("cannot derive a name from {}", local.display()))
            })?;
        for entry in walkdir::WalkDir::new(local) {
            let entry = entry
                .map_err(|e| ForgeError::Image(format!("failed to walk {}: {e}", local.display())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(local)
                .map_err(|e| ForgeError::Image(format!("path outside tree: {e}")))?;
            let iso_path = format!("{base}/{}", rel.to_string_lossy().replace('\\', "/"));
            self.add_file(&iso_path, entry.path())?;
        }
        Ok(())
    }

    pub fn has_content(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn is_udf(&self) -> ForgeResult<bool> {
        detect::probe_udf(&self.source)
    }

    pub fn detect_boot(&self) -> ForgeResult<BootProfile> {
        let mut reader = IsoReader::open(&self.source)?;
        detect::detect_boot(&mut reader)
    }

    /// Write the mutated image to `output` and return the hex SHA-256 of its
    /// bytes.
    pub fn write_modified(&self, output: &Path) -> ForgeResult<String> {
        if self.is_udf()? {
            self.rebuilder.check_tools()?;
            tracing::info!("UDF image detected; rebuilding with external tools");
            self.rebuilder.rebuild(&RebuildRequest {
                source: self.source.clone(),
                output: output.to_path_buf(),
                volume_id: detect::volume_id(&self.source),
                files: self.files.clone(),
            })?;
        } else {
            self.write_iso9660(output)?;
        }
        checksum_file(output)
    }

    fn write_iso9660(&self, output: &Path) -> ForgeResult<()> {
        let mut reader = IsoReader::open(&self.source)?;
        let profile = detect::detect_boot(&mut reader)?;
        if !profile.is_bootable() {
            if self.allow_unbootable {
                tracing::warn!("no boot configuration detected; the result may not boot");
            } else {
                return Err(ForgeError::Image(
                    "no boot configuration detected in the source image".into(),
                ));
            }
        }

        let mut writer = IsoWriter::new(&profile.volume_id);

        // Copy the source tree, deferring symlinks for resolution.
        let mut symlinks: Vec<(String, String)> = Vec::new();
        for (path, entry) in reader.walk()? {
            if self.files.contains_key(&path) {
                continue;
            }
            if let Some(target) = &entry.symlink {
                symlinks.push((path, target.clone()));
            } else if entry.is_dir {
                writer.add_dir(&path)?;
            } else {
                writer.add_file(&path, reader.read_file(&entry)?)?;
            }
        }

        self.materialize_symlinks(&mut reader, &mut writer, &symlinks)?;

        for (path, content) in &self.files {
            writer.add_file(path, content.clone())?;
        }

        if profile.is_bootable() {
            writer.set_el_torito(ElToritoSpec {
                catalog_path: BOOT_CATALOG_NAME.to_string(),
                bios: profile.bios.as_ref().map(|b| BootEntrySpec {
                    path: b.path.clone(),
                    load_sectors: b.load_sectors,
                }),
                efi: profile.uefi.as_ref().map(|path| BootEntrySpec {
                    path: path.clone(),
                    load_sectors: 0,
                }),
            });
        }

        let image = writer.build()?;
        std::fs::write(output, &image).map_err(|e| {
            ForgeError::Image(format!("failed to write {}: {e}", output.display()))
        })?;

        if let Some(bios) = profile.bios.as_ref().filter(|b| b.needs_boot_info_table) {
            boot_info::patch(output, &bios.path)?;
        }

        Ok(())
    }

    /// Materialize symlinks as real files or directories. The caller mapping
    /// wins; otherwise the target recorded in the image is tried, then the
    /// suite-codename and dotted-sibling heuristics. Unresolved links are
    /// surfaced and omitted.
    fn materialize_symlinks(
        &self,
        reader: &mut IsoReader,
        writer: &mut IsoWriter,
        symlinks: &[(String, String)],
    ) -> ForgeResult<()> {
        for (path, recorded_target) in symlinks {
            let target = self
                .symlink_targets
                .get(path)
                .cloned()
                .or_else(|| resolve_target(path, recorded_target))
                .or_else(|| self.detect_heuristic_target(reader, path).ok().flatten());

            let Some(target) = target else {
                tracing::warn!(link = %path, target = %recorded_target, "unresolved symlink; omitted");
                continue;
            };

            let Some(entry) = reader.lookup(&target)? else {
                tracing::warn!(link = %path, target = %target, "symlink target missing; omitted");
                continue;
            };

            if entry.is_dir {
                writer.add_dir(path)?;
                self.copy_dir_contents(reader, writer, &entry, path)?;
            } else {
                writer.add_file(path, reader.read_file(&entry)?)?;
            }
        }
        Ok(())
    }

    fn copy_dir_contents(
        &self,
        reader: &mut IsoReader,
        writer: &mut IsoWriter,
        dir: &DirEntry,
        dest: &str,
    ) -> ForgeResult<()> {
        for entry in reader.list_dir(dir)? {
            if entry.symlink.is_some() {
                continue;
            }
            let child_dest = format!("{dest}/{}", entry.name);
            if self.files.contains_key(&child_dest) {
                continue;
            }
            if entry.is_dir {
                writer.add_dir(&child_dest)?;
                self.copy_dir_contents(reader, writer, &entry, &child_dest)?;
            } else {
                writer.add_file(&child_dest, reader.read_file(&entry)?)?;
            }
        }
        Ok(())
    }

    /// Heuristics for links whose recorded target is unusable: a Debian-style
    /// suite directory, or a sibling sharing the link's name plus a dotted
    /// tag (`index.html` -> `index.en.html`).
    fn detect_heuristic_target(
        &self,
        reader: &mut IsoReader,
        link_path: &str,
    ) -> ForgeResult<Option<String>> {
        let (dir, name) = match link_path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", link_path),
        };

        if dir == "dists"
            && matches!(name, "stable" | "testing" | "unstable" | "oldstable")
        {
            let entries = match reader.lookup(dir)? {
                Some(entry) if entry.is_dir => reader.list_dir(&entry)?,
                _ => Vec::new(),
            };
            for entry in entries {
                if entry.is_dir
                    && entry.symlink.is_none()
                    && SUITE_CODENAMES.contains(&entry.name.as_str())
                {
                    return Ok(Some(format!("{dir}/{}", entry.name)));
                }
            }
        }

        let siblings = if dir.is_empty() {
            reader.root()?
        } else {
            match reader.lookup(dir)? {
                Some(entry) if entry.is_dir => reader.list_dir(&entry)?,
                _ => return Ok(None),
            }
        };
        let prefix = format!("{name}.");
        for entry in siblings {
            if entry.symlink.is_none() && entry.name.starts_with(&prefix) {
                return Ok(Some(if dir.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{dir}/{}", entry.name)
                }));
            }
        }

        Ok(None)
    }
}

/// Turn a recorded link target into an image-root-relative path, when it
/// stays inside the image.
fn resolve_target(link_path: &str, target: &str) -> Option<String> {
    if target.is_empty() || target == "." {
        return None;
    }
    let mut stack: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        let mut parts: Vec<&str> = link_path.split('/').collect();
        parts.pop();
        parts
    };
    for comp in target.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        None
    } else {
        Some(stack.join("/"))
    }
}

/// Hex SHA-256 of a file, streamed.
pub fn checksum_file(path: &Path) -> ForgeResult<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| ForgeError::Image(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_targets_resolve_against_the_link_directory() {
        assert_eq!(
            resolve_target("dists/stable", "bookworm"),
            Some("dists/bookworm".into())
        );
        assert_eq!(
            resolve_target("doc/FAQ/index.html", "index.en.html"),
            Some("doc/FAQ/index.en.html".into())
        );
        assert_eq!(
            resolve_target("a/b/link", "../c/file"),
            Some("a/c/file".into())
        );
        assert_eq!(resolve_target("link", "/boot/grub"), Some("boot/grub".into()));
    }

    #[test]
    fn root_pointing_targets_are_rejected() {
        assert_eq!(resolve_target("debian", "."), None);
        assert_eq!(resolve_target("x", ".."), None);
    }
}
