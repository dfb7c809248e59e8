//! ringflow CLI - stream items through an accelerator kernel

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod metric;
mod sink;
mod source;
mod vecsum;

#[derive(Parser)]
#[command(name = "ringflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sum random vector pairs on the accelerator and check the results
    Vecsum(commands::vecsum::VecsumArgs),
    /// Show visible accelerator platforms and devices
    Info {
        /// Hide the software emulation platform
        #[arg(long)]
        no_emulation: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Vecsum(args) => commands::vecsum::execute(args),
        Commands::Info { no_emulation } => commands::info::execute(!no_emulation),
    }
}
