use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "vappforge", version, about = "Build VCD vApp templates from installer ISOs")]
pub struct Cli {
    /// Enable debug logging (repeat for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a build configuration file.
    Validate(commands::validate::ValidateArgs),
    /// Run a build. Without a linked cloud driver this only supports
    /// --rehearse, which runs the full pipeline against the simulator.
    Build(commands::build::BuildArgs),
    /// Show what an installer image looks like to the mutator.
    InspectIso(commands::inspect_iso::InspectIsoArgs),
}

pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Validate(args) => commands::validate::execute(args),
        Command::Build(args) => commands::build::execute(args).await,
        Command::InspectIso(args) => commands::inspect_iso::execute(args),
    }
}
