//! # GraphMap
//!
//! Command-line front-end for the graphmap-core engine.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              apps/graphmap (CLI)             │
//! │                                              │
//! │  config (toml) ──► cli (clap) ──► commands   │
//! │                                     │        │
//! │                                     ▼        │
//! │   ┌───────────────┐      ┌───────────────┐   │
//! │   │ graphmap-core │ ◄──► │  BlobStore    │   │
//! │   │  (GraphMap)   │      │ (redb/memory) │   │
//! │   └───────────────┘      └───────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! graphmap init
//! graphmap exec "upsert node key=node1, tags='name=marko';"
//! graphmap exec -f script.gm
//! graphmap --json-mode exec "select (key=node1) -> [knows] -> (*);"
//! graphmap status
//! graphmap export -o graph.json
//! ```

mod cli;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // GRAPHMAP_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("GRAPHMAP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "graphmap=info,graphmap_core=info".into());

    // Logs go to stderr; stdout carries command output
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
