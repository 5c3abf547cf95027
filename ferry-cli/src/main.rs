//! Ferry: change-data-capture replication between versioned stores.
//!
//! # Usage
//!
//! ```text
//! ferry import   [--config PATH] [--channel NAME]
//! ferry export   [--config PATH] [--channel NAME]
//! ferry status   [--config PATH] [--json]
//! ferry validate [--config PATH]
//! ferry unlock   [--config PATH] [--export]
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    export::ExportArgs, import::ImportArgs, status::StatusArgs, unlock::UnlockArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ferry",
    version,
    about = "Replicate change-log rows into versioned stores and keep them in sync",
    long_about = None,
)]
struct Cli {
    /// Path to ferry.yaml (default: ~/.ferry/ferry.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull change logs into staging, reconcile, sync to production, compact.
    Import(ImportArgs),

    /// Push production edits back to staging and hand off a change message.
    Export(ExportArgs),

    /// Show datasets, watermarks, dead letters and lock state.
    Status(StatusArgs),

    /// Load and validate the config without touching any store.
    Validate,

    /// Remove a lock marker left behind by a crashed run.
    Unlock(UnlockArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Import(args) => args.run(config),
        Commands::Export(args) => args.run(config),
        Commands::Status(args) => args.run(config).map(|()| ExitCode::SUCCESS),
        Commands::Validate => commands::validate::run(config).map(|()| ExitCode::SUCCESS),
        Commands::Unlock(args) => args.run(config).map(|()| ExitCode::SUCCESS),
    }
}
