//! Google guest agent.
//!
//! # Usage
//!
//! ```text
//! guest-agent [--config <path>] [run]
//! guest-agent [--config <path>] config [--json]
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::config::ConfigArgs;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "guest-agent",
    version,
    about = "Keep a Compute Engine guest in line with its instance metadata",
    long_about = None,
)]
struct Cli {
    /// Base instance config file. Defaults to the platform location.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent until stopped by the service manager or a signal.
    Run,

    /// Print the effective merged configuration.
    Config(ConfigArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::run(cli.config),
        Commands::Config(args) => args.run(cli.config),
    }
}
