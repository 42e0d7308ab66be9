use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the build configuration (JSON).
    #[arg(short, long)]
    pub config: PathBuf,
}

pub fn execute(args: ValidateArgs) -> anyhow::Result<()> {
    let options = super::load_options(&args.config)?;
    options.sanitize()?;
    println!("{} is valid", args.config.display());
    println!(
        "  vm: {}  vdc: {}  flow: {}",
        options.location.vm_name,
        options.location.vdc,
        if options.needs_late_bind() {
            "late-bind"
        } else {
            "early-bind"
        }
    );
    Ok(())
}
