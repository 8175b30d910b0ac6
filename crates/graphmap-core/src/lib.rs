//! # graphmap-core
//!
//! An embedded, in-memory graph engine driven by a small text command
//! language, with lease-protected snapshot persistence.
//!
//! ## Layers
//!
//! - `lexer` / `parser` turn command text into `Instruction`s
//! - `executor` runs instructions against the tables of a `GraphMap`
//!   under its single lock
//! - `formats` encodes snapshots (postcard with a magic/version header)
//!   and renders JSON
//! - `store` / `retry` / `persistence` move snapshots in and out of a
//!   `BlobStore` under exclusive leases and ETag checks
//!
//! The engine itself is synchronous. Only persistence is async.

// =============================================================================
// MODULES
// =============================================================================

pub mod executor;
pub mod formats;
pub mod instruction;
pub mod lexer;
pub mod map;
pub mod parser;
pub mod persistence;
pub mod primitives;
pub mod retry;
pub mod store;
pub mod tags;
pub mod types;

// =============================================================================
// RE-EXPORTS: Data Model
// =============================================================================

pub use tags::{Tag, Tags, wildcard_match};
pub use types::{EdgeId, GraphEdge, GraphEntity, GraphError, GraphNode, normalize_key};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use executor::{CommandKind, QueryResult, ResultSet};
pub use instruction::{
    CreateMode, Delete, Direction, EdgeCreate, EdgeSearch, Instruction, NodeCreate, NodeSearch,
    Pattern, Select, StageKind, Update, UpdateSet,
};
pub use map::{GraphMap, GraphMapBuilder, SerializableGraphMap};
pub use parser::parse;

// =============================================================================
// RE-EXPORTS: Persistence
// =============================================================================

pub use formats::{PersistenceHeader, map_from_bytes, map_to_bytes};
pub use persistence::{DEFAULT_LEASE_DURATION, GraphPersistence, PersistenceError};
pub use retry::{RetryError, RetryPolicy};
pub use store::{
    Blob, BlobStore, ETag, LeaseId, MemoryBlobStore, RedbBlobStore, StoreError,
};
