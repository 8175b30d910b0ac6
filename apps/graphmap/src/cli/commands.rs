//! # CLI Command Implementations

use crate::config::{Backend, Config};
use crate::error::AppError;
use graphmap_core::formats::result_to_json;
use graphmap_core::primitives::MAX_COMMAND_LENGTH;
use graphmap_core::{
    BlobStore, CommandKind, GraphMap, GraphPersistence, MemoryBlobStore, QueryResult,
    RedbBlobStore, ResultSet,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Items printed per result in text mode before eliding.
const MAX_PRINTED_ITEMS: usize = 20;

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
    pub verbose: bool,
}

// =============================================================================
// HELPERS
// =============================================================================

/// Open the configured store.
pub fn open_store(config: &Config) -> Result<Arc<dyn BlobStore>, AppError> {
    match config.store.backend {
        Backend::Redb => Ok(Arc::new(RedbBlobStore::open(&config.store.path)?)),
        Backend::Memory => Ok(Arc::new(MemoryBlobStore::new())),
    }
}

pub fn open_persistence(config: &Config) -> Result<GraphPersistence, AppError> {
    let store = open_store(config)?;
    Ok(GraphPersistence::new(store, config.store.blob.clone())
        .with_policy(config.retry.policy())
        .with_lease_duration(config.lease.duration()))
}

/// Resolve the script from the positional argument or `--file`.
pub fn read_script(command: Option<String>, file: Option<PathBuf>) -> Result<String, AppError> {
    match (command, file) {
        (Some(command), None) => Ok(command),
        (None, Some(path)) => {
            let metadata = std::fs::metadata(&path)
                .map_err(|e| AppError::io(&format!("Cannot read '{}'", path.display()), e))?;
            if metadata.len() > MAX_COMMAND_LENGTH as u64 {
                return Err(AppError::Usage(format!(
                    "Script size {} bytes exceeds maximum {} bytes",
                    metadata.len(),
                    MAX_COMMAND_LENGTH
                )));
            }
            std::fs::read_to_string(&path)
                .map_err(|e| AppError::io(&format!("Cannot read '{}'", path.display()), e))
        }
        (None, None) => Err(AppError::Usage(
            "exec needs a command or --file".to_string(),
        )),
        (Some(_), Some(_)) => Err(AppError::Usage(
            "exec takes either a command or --file, not both".to_string(),
        )),
    }
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn print_result_set(set: &ResultSet, indent: &str) {
    match set {
        ResultSet::Empty => {}
        ResultSet::Nodes(nodes) => {
            for node in nodes.iter().take(MAX_PRINTED_ITEMS) {
                println!("{}({}) {}", indent, node.key(), node.tags());
            }
        }
        ResultSet::Edges(edges) => {
            for edge in edges.iter().take(MAX_PRINTED_ITEMS) {
                println!(
                    "{}{} -[{}]-> {} {}",
                    indent,
                    edge.from_key(),
                    edge.edge_type(),
                    edge.to_key(),
                    edge.tags()
                );
            }
        }
    }
    if set.len() > MAX_PRINTED_ITEMS {
        println!("{}... and {} more", indent, set.len() - MAX_PRINTED_ITEMS);
    }
}

fn print_result(result: &QueryResult, verbose: bool) {
    match result.kind {
        CommandKind::Select => {
            println!("SELECT: {} item(s)", result.items.len());
            print_result_set(&result.items, "  ");
            if verbose {
                for (alias, set) in &result.aliases {
                    println!("  as {}: {} item(s)", alias, set.len());
                    print_result_set(set, "    ");
                }
            }
        }
        kind => println!("{}: {} affected", kind.as_str(), result.affected),
    }
}

// =============================================================================
// EXEC COMMAND
// =============================================================================

/// Load the graph, run `script`, and save when anything was mutated.
///
/// A failing statement aborts the command without saving, and so does a
/// cancellation.
pub async fn cmd_exec(
    config: &Config,
    output: Output,
    script: &str,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let persistence = open_persistence(config)?;
    let map = persistence.load_or_default(cancel).await?;

    let results = map.execute(script)?;
    let mutated = results.iter().any(|r| r.kind != CommandKind::Select);

    if mutated {
        let etag = persistence.save(&map, cancel).await?;
        info!(blob = %config.store.blob, etag = %etag, "checkpoint written");
    }

    if output.json {
        let rendered: Vec<_> = results.iter().map(result_to_json).collect();
        print_json(&serde_json::Value::Array(rendered));
    } else if !output.quiet {
        for result in &results {
            print_result(result, output.verbose);
        }
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

pub async fn cmd_status(
    config: &Config,
    output: Output,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let persistence = open_persistence(config)?;
    let map = persistence.load(cancel).await?;
    let stored = map.is_some();
    let map = map.unwrap_or_default();
    let etag = persistence.etag().await;

    if output.json {
        print_json(&serde_json::json!({
            "backend": config.store.backend.as_str(),
            "database": config.store.path.to_string_lossy(),
            "blob": config.store.blob,
            "stored": stored,
            "etag": etag.map(|e| e.0),
            "node_count": map.node_count()?,
            "edge_count": map.edge_count()?,
        }));
        return Ok(());
    }

    println!("GraphMap Status");
    println!("===============");
    println!("Backend:  {}", config.store.backend.as_str());
    println!("Database: {:?}", config.store.path);
    println!("Blob:     {}", config.store.blob);
    match etag {
        Some(etag) => println!("ETag:     {}", etag),
        None => println!("ETag:     (nothing stored)"),
    }
    println!();
    println!("Nodes: {}", map.node_count()?);
    println!("Edges: {}", map.edge_count()?);
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export the graph as pretty JSON.
pub async fn cmd_export(
    config: &Config,
    output: Output,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let persistence = open_persistence(config)?;
    let map = persistence.load_or_default(cancel).await?;

    let data = serde_json::to_vec_pretty(&map.to_json()?)
        .map_err(|e| AppError::Io(format!("Encode JSON: {}", e)))?;
    std::fs::write(path, &data)
        .map_err(|e| AppError::io(&format!("Write '{}'", path.display()), e))?;

    if !output.quiet {
        println!("Exported {} bytes to {:?}", data.len(), path);
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Store an empty graph. Refuses to replace an existing one without `force`.
pub async fn cmd_init(
    config: &Config,
    output: Output,
    force: bool,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let persistence = open_persistence(config)?;

    let existing = persistence.load(cancel).await?;
    if existing.is_some() && !force {
        return Err(AppError::Usage(format!(
            "A graph already exists at '{}'. Use --force to overwrite.",
            config.store.blob
        )));
    }

    let etag = persistence.save(&GraphMap::new(), cancel).await?;
    if !output.quiet {
        println!(
            "Initialized empty graph '{}' ({} backend, etag {})",
            config.store.blob,
            config.store.backend.as_str(),
            etag
        );
    }
    Ok(())
}
