//! External extract-and-rebuild path for UDF (Windows-style) images.
//!
//! In-place rewriting of a dual ISO-9660/UDF image is impractical, so the
//! source is unpacked with an archive extractor, overlaid with the injected
//! files, and re-mastered by an external image builder with simultaneous
//! Rock Ridge, Joliet, and UDF. The external invocation sits behind
//! `ImageRebuilder` so the pipeline stays testable without the host tools.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::{ForgeError, ForgeResult};

/// One rebuild request: unpack `source`, overlay `files`, produce `output`.
#[derive(Debug, Clone)]
pub struct RebuildRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub volume_id: String,
    /// Destination path inside the image -> content.
    pub files: BTreeMap<String, Vec<u8>>,
}

pub trait ImageRebuilder: Send + Sync {
    /// Verify the host tools exist before any work starts. The error carries
    /// an installation hint.
    fn check_tools(&self) -> ForgeResult<()>;

    fn rebuild(&self, request: &RebuildRequest) -> ForgeResult<()>;
}

/// Rebuilds with `7z` for extraction and `mkisofs`/`genisoimage` for
/// mastering.
pub struct HostToolsRebuilder;

impl HostToolsRebuilder {
    fn extractor() -> ForgeResult<PathBuf> {
        find_in_path("7z").ok_or_else(|| {
            ForgeError::MissingTool(
                "7z not found in PATH. Install it with: apt-get install p7zip-full \
                 (Debian/Ubuntu) or yum install p7zip (RHEL/CentOS)"
                    .into(),
            )
        })
    }

    fn builder() -> ForgeResult<PathBuf> {
        find_in_path("mkisofs")
            .or_else(|| find_in_path("genisoimage"))
            .ok_or_else(|| {
                ForgeError::MissingTool(
                    "mkisofs/genisoimage not found in PATH. Install with: \
                     apt-get install genisoimage"
                        .into(),
                )
            })
    }
}

impl ImageRebuilder for HostToolsRebuilder {
    fn check_tools(&self) -> ForgeResult<()> {
        Self::extractor()?;
        Self::builder()?;
        Ok(())
    }

    fn rebuild(&self, request: &RebuildRequest) -> ForgeResult<()> {
        let extractor = Self::extractor()?;
        let builder = Self::builder()?;

        let scratch = tempfile::Builder::new()
            .prefix("vappforge-extract-")
            .tempdir()
            .map_err(|e| ForgeError::Image(format!("failed to create scratch dir: {e}")))?;
        let extract_dir = scratch.path();

        run_tool(
            Command::new(&extractor)
                .arg("x")
                .arg(&request.source)
                .arg({
                    let mut flag = OsString::from("-o");
                    flag.push(extract_dir);
                    flag
                })
                .arg("-y"),
            "7z extract",
        )?;

        // A Windows image always carries a boot directory; its absence means
        // the extraction silently produced garbage.
        if !extract_dir.join("boot").is_dir() && !extract_dir.join("Boot").is_dir() {
            return Err(ForgeError::Image(
                "extraction appears to have failed: no 'boot' directory in extracted image"
                    .into(),
            ));
        }

        for (path, content) in &request.files {
            let dest = extract_dir.join(path.trim_start_matches('/'));
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ForgeError::Image(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
            std::fs::write(&dest, content).map_err(|e| {
                ForgeError::Image(format!("failed to write {}: {e}", dest.display()))
            })?;
        }

        let bios_boot = first_existing(
            extract_dir,
            &["boot/etfsboot.com", "Boot/etfsboot.com", "BOOT/ETFSBOOT.COM"],
        );
        let uefi_boot = first_existing(
            extract_dir,
            &[
                "efi/microsoft/boot/efisys.bin",
                "EFI/Microsoft/Boot/efisys.bin",
                "efi/microsoft/boot/efisys_noprompt.bin",
                "EFI/Microsoft/Boot/efisys_noprompt.bin",
            ],
        );

        let mut cmd = Command::new(&builder);
        cmd.arg("-o")
            .arg(&request.output)
            .args(["-V", &request.volume_id])
            .args(["-iso-level", "3"])
            .arg("-J")
            .arg("-joliet-long")
            .arg("-udf")
            .arg("-allow-limited-size")
            .arg("-r");

        if let Some(bios) = &bios_boot {
            cmd.args(["-b", bios])
                .arg("-no-emul-boot")
                .args(["-boot-load-seg", "0x07C0"])
                .args(["-boot-load-size", "8"]);
        }
        if let Some(uefi) = &uefi_boot {
            if bios_boot.is_some() {
                cmd.arg("-eltorito-alt-boot");
            }
            cmd.args(["-e", uefi]).arg("-no-emul-boot");
        }
        if bios_boot.is_some() || uefi_boot.is_some() {
            cmd.args(["-c", "boot.cat"]);
        } else {
            tracing::warn!("no boot payloads found in extracted image; result will not boot");
        }
        cmd.arg(extract_dir);

        run_tool(&mut cmd, "image rebuild")
    }
}

fn first_existing(root: &Path, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|c| root.join(c).is_file())
        .map(|c| (*c).to_string())
}

fn run_tool(cmd: &mut Command, what: &str) -> ForgeResult<()> {
    tracing::debug!(command = ?cmd, "{what}");
    let output = cmd
        .output()
        .map_err(|e| ForgeError::Image(format!("{what} failed to start: {e}")))?;
    if !output.status.success() {
        return Err(ForgeError::Image(format!(
            "{what} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Locate an executable on PATH, the way the shell would.
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// A rebuilder that records requests instead of shelling out; for tests.
#[derive(Default)]
pub struct StubRebuilder {
    pub requests: std::sync::Mutex<Vec<RebuildRequest>>,
    /// When true, `check_tools` reports the tools as missing.
    pub missing_tools: bool,
}

impl ImageRebuilder for StubRebuilder {
    fn check_tools(&self) -> ForgeResult<()> {
        if self.missing_tools {
            Err(ForgeError::MissingTool("stub tools unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn rebuild(&self, request: &RebuildRequest) -> ForgeResult<()> {
        std::fs::write(&request.output, b"stub-rebuilt-image")
            .map_err(|e| ForgeError::Image(format!("stub rebuild write failed: {e}")))?;
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_in_path_locates_common_binaries() {
        // `sh` exists on any host these tests run on.
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-tool-xyz").is_none());
    }

    #[test]
    fn stub_records_requests() {
        let stub = StubRebuilder::default();
        let dir = tempfile::tempdir().unwrap();
        let request = RebuildRequest {
            source: dir.path().join("src.iso"),
            output: dir.path().join("out.iso"),
            volume_id: "WIN".into(),
            files: BTreeMap::from([("autounattend.xml".to_string(), b"<xml/>".to_vec())]),
        };
        stub.rebuild(&request).unwrap();
        assert!(request.output.is_file());
        assert_eq!(stub.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn stub_can_simulate_missing_tools() {
        let stub = StubRebuilder {
            missing_tools: true,
            ..Default::default()
        };
        assert!(matches!(
            stub.check_tools(),
            Err(ForgeError::MissingTool(_))
        ));
    }
}
