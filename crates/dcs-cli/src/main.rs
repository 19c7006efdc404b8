//! # dcs CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.
//! Uses clap derive macros with a `bundles`/`run` subcommand structure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dcs_cli::bundles::{run_bundles, BundlesCommand};
use dcs_cli::diagnose::{run_diagnose, DiagnoseArgs};

/// Disclosure Compliance Stack CLI
///
/// Regulatory bundle management, compile previews, and run diagnostics for
/// the compliance pipeline.
#[derive(Parser, Debug)]
#[command(name = "dcs", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// State directory holding the local bundle registry snapshot.
    #[arg(long, global = true, env = "DCS_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Regulatory bundle registry operations.
    Bundles {
        #[command(subcommand)]
        command: BundlesCommand,
    },

    /// Run-level operations.
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
}

#[derive(Subcommand, Debug)]
enum RunCommands {
    /// Print the per-stage event record of a run.
    Diagnose(DiagnoseArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity level.
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let state_dir = cli
        .state_dir
        .unwrap_or_else(|| PathBuf::from(".dcs"));

    let result = match cli.command {
        Commands::Bundles { command } => run_bundles(&command, &state_dir).await,
        Commands::Run {
            command: RunCommands::Diagnose(args),
        } => run_diagnose(&args).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(dcs_cli::EXIT_USER_ERROR)
        }
    }
}
