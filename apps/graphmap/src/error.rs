//! # Application Errors
//!
//! Everything the binary can fail with. Core errors pass through unchanged.

use graphmap_core::{GraphError, PersistenceError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration file could not be read or parsed.
    #[error("Invalid configuration '{path}': {message}")]
    Config { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid combination of command-line arguments.
    #[error("{0}")]
    Usage(String),
}

impl AppError {
    pub fn io(context: &str, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {}", context, err))
    }
}
