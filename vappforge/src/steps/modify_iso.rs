//! Rewrite the installer image with injected content.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::{ForgeError, ForgeResult};
use crate::iso::IsoModifier;
use crate::pipeline::{BuildContext, BuildState, Step, StepAction};
use crate::template::{netmask_prefix, TemplateVars};

#[derive(Default)]
pub struct ModifyIsoStep {
    modified_path: Option<PathBuf>,
}

/// Variables available to answer-file content, from what earlier stages
/// discovered.
pub fn template_vars(state: &BuildState) -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.set_ip("VMIP", state.vm_ip);
    vars.set_ip("VMGateway", state.network_gateway);
    vars.set_ip("VMDNS", state.network_dns);
    if let Some(netmask) = state.network_netmask {
        vars.set("VMNetmask", netmask.to_string());
        vars.set("VMPrefix", netmask_prefix(netmask).to_string());
    }
    if let Some(ip) = state.http_ip {
        vars.set("HTTPIP", ip.to_string());
    }
    if let Some(port) = state.http_port {
        vars.set("HTTPPort", port.to_string());
    }
    vars
}

#[async_trait]
impl Step for ModifyIsoStep {
    fn name(&self) -> &'static str {
        "modify-iso"
    }

    async fn run(
        &mut self,
        ctx: &BuildContext,
        state: &mut BuildState,
    ) -> ForgeResult<StepAction> {
        let image = &ctx.options.image;
        if !image.has_injected_content() {
            return Ok(StepAction::Continue);
        }

        let iso_path = state.iso_path()?.clone();
        let mut modifier = IsoModifier::new(&iso_path, ctx.rebuilder.clone());
        modifier.set_symlink_targets(image.symlink_targets.clone());

        let vars = template_vars(state);
        for (path, content) in &image.cd_content {
            let rendered = vars.render(content);
            tracing::info!(path = %path, bytes = rendered.len(), "injecting content");
            modifier.add_content(path, rendered.into_bytes());
        }

        for local in &image.cd_files {
            let meta = std::fs::metadata(local).map_err(|e| {
                ForgeError::Config(format!("failed to stat cd_file {}: {e}", local.display()))
            })?;
            if meta.is_dir() {
                tracing::info!(path = %local.display(), "injecting directory");
                modifier.add_tree(local)?;
            } else {
                let name = local
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        ForgeError::Config(format!("bad cd_file path {}", local.display()))
                    })?;
                // cd_content wins when both name the same destination.
                if image.cd_content.contains_key(&name) {
                    tracing::debug!(file = %name, "skipped; overridden by cd_content");
                    continue;
                }
                tracing::info!(file = %name, "injecting file");
                modifier.add_file(&name, local)?;
            }
        }

        match modifier.detect_boot() {
            Ok(profile) => {
                if let Some(bios) = &profile.bios {
                    tracing::info!(
                        payload = %bios.path,
                        boot_info_table = bios.needs_boot_info_table,
                        "detected BIOS boot"
                    );
                }
                if let Some(uefi) = &profile.uefi {
                    tracing::info!(payload = %uefi, "detected UEFI boot");
                }
                if !profile.is_bootable() {
                    tracing::warn!("no boot configuration detected; result may not boot");
                }
            }
            Err(e) => tracing::warn!(error = %e, "boot detection failed; continuing"),
        }

        let stem = iso_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "installer".into());
        let output = std::env::temp_dir().join(format!("{stem}-modified.iso"));

        tracing::info!(output = %output.display(), "rewriting installer image");
        let checksum = {
            let output = output.clone();
            tokio::task::spawn_blocking(move || modifier.write_modified(&output))
                .await
                .map_err(|e| ForgeError::Internal(format!("image rewrite task failed: {e}")))??
        };
        tracing::info!(sha256 = %checksum, "installer image rewritten");

        self.modified_path = Some(output.clone());
        state.iso_path = Some(output);
        state.iso_checksum = Some(format!("sha256:{checksum}"));
        state.iso_modified = true;
        Ok(StepAction::Continue)
    }

    async fn cleanup(&mut self, _ctx: &BuildContext, _state: &mut BuildState) {
        if let Some(path) = self.modified_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove rewritten image");
                }
            }
        }
    }
}
