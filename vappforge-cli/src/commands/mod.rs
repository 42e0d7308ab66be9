pub mod build;
pub mod inspect_iso;
pub mod validate;

use std::path::Path;

use vappforge::BuildOptions;

pub fn load_options(path: &Path) -> anyhow::Result<BuildOptions> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let options: BuildOptions = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(options)
}
