//! # Core Type Definitions
//!
//! This module contains the data model of the graph engine:
//! - Identifiers (`EdgeId`) and key normalization
//! - Graph entities (`GraphNode`, `GraphEdge`, `GraphEntity`)
//! - Error types (`GraphError`)
//!
//! ## Invariants enforced at construction
//!
//! - Node keys and edge types are non-empty and bounded by `MAX_KEY_LENGTH`
//! - An edge never connects a key to itself (case-insensitive)
//! - Entity payloads are bounded by `MAX_ENTITY_SIZE`

use crate::primitives::{DEFAULT_EDGE_TYPE, MAX_ENTITY_SIZE, MAX_KEY_LENGTH};
use crate::tags::Tags;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Generated identifier of an edge. Never written by users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized form of a node key used for table lookups.
pub fn normalize_key(key: &str) -> String {
    key.to_lowercase()
}

/// Case-insensitive key equality.
pub fn keys_equal(a: &str, b: &str) -> bool {
    a == b || normalize_key(a) == normalize_key(b)
}

fn validate_key(kind: &str, key: &str) -> Result<(), GraphError> {
    if key.trim().is_empty() {
        return Err(GraphError::InvalidNode(format!("{} must not be empty", kind)));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(GraphError::InvalidNode(format!(
            "{} length {} exceeds maximum {} bytes",
            kind,
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

fn validate_entity(entity: &[u8]) -> Result<(), GraphError> {
    if entity.len() > MAX_ENTITY_SIZE {
        return Err(GraphError::InvalidNode(format!(
            "entity size {} exceeds maximum {} bytes",
            entity.len(),
            MAX_ENTITY_SIZE
        )));
    }
    Ok(())
}

// =============================================================================
// NODE
// =============================================================================

/// A uniquely keyed vertex with tags and an optional opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    key: String,
    tags: Tags,
    entity: Option<Vec<u8>>,
}

impl GraphNode {
    /// Create a node with no tags and no entity.
    pub fn new(key: impl Into<String>) -> Result<Self, GraphError> {
        let key = key.into();
        validate_key("node key", &key)?;
        Ok(Self {
            key,
            tags: Tags::new(),
            entity: None,
        })
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl Into<Tags>) -> Self {
        self.tags = tags.into();
        self
    }

    pub fn with_entity(mut self, entity: Vec<u8>) -> Result<Self, GraphError> {
        validate_entity(&entity)?;
        self.entity = Some(entity);
        Ok(self)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn entity(&self) -> Option<&[u8]> {
        self.entity.as_deref()
    }

    pub(crate) fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }

    pub(crate) fn set_entity(&mut self, entity: Vec<u8>) -> Result<(), GraphError> {
        validate_entity(&entity)?;
        self.entity = Some(entity);
        Ok(())
    }

    /// Re-check construction invariants (used after deserialization).
    pub(crate) fn validate(&self) -> Result<(), GraphError> {
        validate_key("node key", &self.key)?;
        match &self.entity {
            Some(entity) => validate_entity(entity),
            None => Ok(()),
        }
    }
}

// =============================================================================
// EDGE
// =============================================================================

/// A directed, typed, tagged relation between two node keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    id: EdgeId,
    from_key: String,
    to_key: String,
    edge_type: String,
    tags: Tags,
}

impl GraphEdge {
    /// Create an edge with a fresh id and the default edge type.
    ///
    /// Fails with `GraphError::InvalidEdge` when both endpoints name the
    /// same node.
    pub fn new(from_key: impl Into<String>, to_key: impl Into<String>) -> Result<Self, GraphError> {
        let edge = Self {
            id: EdgeId::generate(),
            from_key: from_key.into(),
            to_key: to_key.into(),
            edge_type: DEFAULT_EDGE_TYPE.to_string(),
            tags: Tags::new(),
        };
        edge.validate()?;
        Ok(edge)
    }

    pub fn with_edge_type(mut self, edge_type: impl Into<String>) -> Result<Self, GraphError> {
        let edge_type = edge_type.into();
        validate_key("edge type", &edge_type)?;
        self.edge_type = edge_type;
        Ok(self)
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl Into<Tags>) -> Self {
        self.tags = tags.into();
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: EdgeId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn from_key(&self) -> &str {
        &self.from_key
    }

    pub fn to_key(&self) -> &str {
        &self.to_key
    }

    pub fn edge_type(&self) -> &str {
        &self.edge_type
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// True if either endpoint is `key`.
    pub fn touches(&self, key: &str) -> bool {
        keys_equal(&self.from_key, key) || keys_equal(&self.to_key, key)
    }

    /// Same endpoints and same edge type (the identity used by `unique`).
    pub fn same_link(&self, other: &GraphEdge) -> bool {
        keys_equal(&self.from_key, &other.from_key)
            && keys_equal(&self.to_key, &other.to_key)
            && keys_equal(&self.edge_type, &other.edge_type)
    }

    pub(crate) fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }

    pub(crate) fn set_edge_type(&mut self, edge_type: String) -> Result<(), GraphError> {
        validate_key("edge type", &edge_type)?;
        self.edge_type = edge_type;
        Ok(())
    }

    /// Re-check construction invariants (used after deserialization).
    pub(crate) fn validate(&self) -> Result<(), GraphError> {
        validate_key("fromKey", &self.from_key)?;
        validate_key("toKey", &self.to_key)?;
        validate_key("edge type", &self.edge_type)?;
        if keys_equal(&self.from_key, &self.to_key) {
            return Err(GraphError::InvalidEdge(self.from_key.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// HETEROGENEOUS ENUMERATION
// =============================================================================

/// One element of the bulk export sequence: all nodes, then all edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEntity {
    Node(GraphNode),
    Edge(GraphEdge),
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the in-memory engine.
///
/// - `Parse` is a hard input error: never retried, nothing was executed
/// - `InvalidEdge`/`InvalidNode` are rejected at construction
/// - `DuplicateNode`/`DuplicateEdge` come from `unique` creates
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The command text could not be parsed.
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// An edge was constructed with identical endpoints.
    #[error("Invalid edge: fromKey and toKey are both '{0}'")]
    InvalidEdge(String),

    /// A node or edge field violated a construction limit.
    #[error("Invalid entity: {0}")]
    InvalidNode(String),

    /// `add unique node` found an existing key.
    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    /// `add unique edge` found an edge with the same endpoints and type.
    #[error("Edge already exists: {from_key} -> {to_key} ({edge_type})")]
    DuplicateEdge {
        from_key: String,
        to_key: String,
        edge_type: String,
    },

    /// A previous holder of the map lock panicked.
    #[error("Graph lock poisoned")]
    Poisoned,

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred (corrupt or foreign snapshot).
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl GraphError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
