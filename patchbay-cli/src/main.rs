//! Patchbay — apply stored diff batches to repository content.
//!
//! # Usage
//!
//! ```text
//! patchbay apply <batch>
//! patchbay step <batch>
//! patchbay status <batch> [--json]
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG=debug` for per-record detail.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{apply::ApplyArgs, status::StatusArgs, step::StepArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "patchbay",
    version,
    about = "Apply batches of stored unified diffs to repository objects",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply every pending diff of a batch, then report and clean up.
    Apply(ApplyArgs),

    /// Run a single step of a batch, resuming where the last step stopped.
    Step(StepArgs),

    /// Show the records of a batch and their statuses.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("warn");
    let _ = env_logger::Builder::from_env(env)
        .format_target(false)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Apply(args) => args.run(),
        Commands::Step(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
