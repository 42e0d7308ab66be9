use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use vappforge::driver::types::{IpRange, NetworkScope};
use vappforge::sim::SimCloud;
use vappforge::{Builder, CancelSource};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Path to the build configuration (JSON).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Run the pipeline against the in-memory simulator instead of a cloud.
    /// Useful for checking a configuration end-to-end before pointing it at
    /// a real endpoint.
    #[arg(long)]
    pub rehearse: bool,
}

pub async fn execute(args: BuildArgs) -> anyhow::Result<()> {
    let options = super::load_options(&args.config)?;
    options.sanitize()?;

    if !args.rehearse {
        anyhow::bail!(
            "this binary has no cloud driver linked; run with --rehearse, or embed \
             vappforge::Builder with your driver implementation"
        );
    }

    let mut sim = SimCloud::new(&options.location.vdc);
    if !options.network.network.is_empty() {
        sim = sim.with_network(
            &options.network.network,
            NetworkScope {
                gateway: Ipv4Addr::new(10, 0, 0, 1),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                dns1: Some(Ipv4Addr::new(10, 0, 0, 2)),
                dns2: None,
                ranges: vec![IpRange {
                    start: Ipv4Addr::new(10, 0, 0, 10),
                    end: Ipv4Addr::new(10, 0, 0, 250),
                }],
                allocated: Vec::new(),
            },
        );
    }
    if !options.image.iso_catalog.is_empty() {
        sim = sim.with_catalog(&options.image.iso_catalog);
    }
    if let Some(export) = &options.export {
        sim = sim.with_catalog(&export.catalog);
    }

    let (source, token) = CancelSource::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling build");
            source.cancel();
        }
    });

    let artifact = Builder::new(options, Arc::new(sim)).run(token).await?;
    println!("rehearsal complete: {artifact}");
    if let Some(template) = &artifact.template_name {
        println!("  template: {template}");
    }
    Ok(())
}
