use std::path::PathBuf;

use clap::Args;
use vappforge::iso::{detect, IsoReader};

#[derive(Args, Debug)]
pub struct InspectIsoArgs {
    /// Path to the installer image.
    pub path: PathBuf,
}

pub fn execute(args: InspectIsoArgs) -> anyhow::Result<()> {
    let udf = detect::probe_udf(&args.path)?;
    println!("format: {}", if udf { "UDF (dual)" } else { "ISO-9660" });

    if udf {
        println!("volume: {}", detect::volume_id(&args.path));
        println!("note: UDF images are modified via the external rebuild path (7z + mkisofs)");
        return Ok(());
    }

    let mut reader = IsoReader::open(&args.path)?;
    println!("volume: {}", reader.volume_id());

    let profile = detect::detect_boot(&mut reader)?;
    match &profile.bios {
        Some(bios) => println!(
            "bios boot: {} (load {} sectors{})",
            bios.path,
            bios.load_sectors,
            if bios.needs_boot_info_table {
                ", boot-info-table"
            } else {
                ""
            }
        ),
        None => println!("bios boot: none"),
    }
    match &profile.uefi {
        Some(uefi) => println!("uefi boot: {uefi}"),
        None => println!("uefi boot: none"),
    }

    let entries = reader.walk()?;
    println!("entries: {}", entries.len());
    Ok(())
}
