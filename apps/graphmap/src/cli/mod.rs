//! # GraphMap CLI Module
//!
//! ## Available Commands
//!
//! - `exec` - Run a command script against the stored graph
//! - `status` - Show node and edge counts
//! - `export` - Write the graph as JSON
//! - `init` - Create (or reset) the stored graph

mod commands;

use crate::config::Config;
use crate::error::AppError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// GraphMap - embedded tagged graph with a textual command language
#[derive(Parser, Debug)]
#[command(name = "graphmap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to $GRAPHMAP_CONFIG, then ./graphmap.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the redb store file
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Blob path of the graph inside the store
    #[arg(short = 'b', long, global = true)]
    pub blob: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a command script (load, execute, save)
    Exec {
        /// Command text, e.g. "select [knows];"
        command: Option<String>,

        /// Read the script from a file instead
        #[arg(short, long, conflicts_with = "command")]
        file: Option<PathBuf>,
    },

    /// Show graph status
    Status,

    /// Export the graph as JSON
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Initialize a new empty graph
    Init {
        /// Overwrite an existing graph
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Token cancelled on the first Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling the running command");
            interrupt.cancel();
        }
    });
    cancel
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let config =
        Config::load(cli.config.as_deref())?.with_overrides(cli.database, cli.blob);
    let output = Output {
        json: cli.json_mode,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let cancel = cancel_on_interrupt();

    match cli.command {
        Commands::Exec { command, file } => {
            let script = read_script(command, file)?;
            cmd_exec(&config, output, &script, &cancel).await
        }
        Commands::Status => cmd_status(&config, output, &cancel).await,
        Commands::Export { output: path } => cmd_export(&config, output, &path, &cancel).await,
        Commands::Init { force } => cmd_init(&config, output, force, &cancel).await,
    }
}
