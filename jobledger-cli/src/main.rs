//! jobledger — versioned snapshots of orchestrator job definitions.
//!
//! # Usage
//!
//! ```text
//! jobledger [--config PATH] [-v] sync [--dry-run] [--no-push] [--jobs a,b] [--json]
//! jobledger diff [--jobs a,b]
//! jobledger history [--job NAME] [--namespace NS] [--limit N]
//! jobledger show <id>
//! jobledger deploy <id> [job]
//! ```
//!
//! Logs go to stderr (`RUST_LOG` overrides the level); results go to stdout.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};

use commands::{
    deploy::DeployArgs, diff::DiffArgs, history::HistoryArgs, show::ShowArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "jobledger",
    version,
    about = "Capture orchestrator job definitions as versioned, diffable documents",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file (default: $JOBLEDGER_CONFIG, then ~/.jobledger/config.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch every configured job and commit the ones that changed.
    Sync(SyncArgs),

    /// Show unified diffs of what sync would commit.
    Diff(DiffArgs),

    /// List commits that touched job documents.
    History(HistoryArgs),

    /// Show one commit and the documents it changed.
    Show(ShowArgs),

    /// Submit the documents of a past commit to the orchestrator.
    Deploy(DeployArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);
    match cli.command {
        Commands::Sync(args) => args.run(&cli.global),
        Commands::Diff(args) => args.run(&cli.global),
        Commands::History(args) => args.run(&cli.global),
        Commands::Show(args) => args.run(&cli.global),
        Commands::Deploy(args) => args.run(&cli.global),
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose > 0 { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
