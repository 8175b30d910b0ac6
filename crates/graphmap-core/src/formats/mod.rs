//! # Formats
//!
//! Byte-level snapshot encoding and the JSON rendering used for export.

pub mod json;
pub mod persistence;

pub use json::{edge_to_json, graph_to_json, node_to_json, result_to_json};
pub use persistence::{
    MAX_PERSISTENCE_PAYLOAD_SIZE, PersistenceHeader, map_from_bytes, map_to_bytes,
};
