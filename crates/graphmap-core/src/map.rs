//! # Graph Map
//!
//! The in-memory graph: a node table keyed by normalized key and an edge
//! table keyed by generated id, both kept in insertion order.
//!
//! Every public operation takes the single map lock for its whole
//! duration. A command script is parsed before the lock is taken and then
//! runs under one guard, so no other caller observes a partial command.

use crate::executor::{self, QueryResult};
use crate::formats::{self, map_from_bytes, map_to_bytes};
use crate::instruction::Instruction;
use crate::parser;
use crate::types::{
    EdgeId, GraphEdge, GraphEntity, GraphError, GraphNode, keys_equal, normalize_key,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// TABLES
// =============================================================================

/// Lock-free table state. Only reachable through a `GraphMap` guard.
#[derive(Debug, Clone, Default)]
pub(crate) struct GraphTables {
    /// normalized key -> node
    pub(crate) nodes: IndexMap<String, GraphNode>,
    /// edge id -> edge
    pub(crate) edges: IndexMap<EdgeId, GraphEdge>,
}

impl GraphTables {
    /// Insert or replace by key. A replaced node keeps its table position.
    pub(crate) fn upsert_node(&mut self, node: GraphNode) {
        self.nodes.insert(normalize_key(node.key()), node);
    }

    pub(crate) fn insert_unique_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
        let key = normalize_key(node.key());
        if self.nodes.contains_key(&key) {
            return Err(GraphError::DuplicateNode(node.key().to_string()));
        }
        self.nodes.insert(key, node);
        Ok(())
    }

    pub(crate) fn insert_edge(&mut self, edge: GraphEdge) -> EdgeId {
        let id = edge.id();
        self.edges.insert(id, edge);
        id
    }

    pub(crate) fn find_link(&self, edge: &GraphEdge) -> Option<&GraphEdge> {
        self.edges.values().find(|existing| existing.same_link(edge))
    }

    pub(crate) fn insert_unique_edge(&mut self, edge: GraphEdge) -> Result<EdgeId, GraphError> {
        if let Some(existing) = self.find_link(&edge) {
            return Err(GraphError::DuplicateEdge {
                from_key: existing.from_key().to_string(),
                to_key: existing.to_key().to_string(),
                edge_type: existing.edge_type().to_string(),
            });
        }
        Ok(self.insert_edge(edge))
    }

    /// Replace the tags of the edge with the same link, or insert `edge`.
    pub(crate) fn upsert_edge(&mut self, edge: GraphEdge) -> EdgeId {
        match self.edges.values_mut().find(|existing| existing.same_link(&edge)) {
            Some(existing) => {
                existing.set_tags(edge.tags().clone());
                existing.id()
            }
            None => self.insert_edge(edge),
        }
    }

    /// Remove a node and every edge touching it. Returns the number of
    /// edges removed, or `None` when the key is absent.
    pub(crate) fn remove_node(&mut self, key: &str) -> Option<usize> {
        self.nodes.shift_remove(&normalize_key(key))?;
        let before = self.edges.len();
        self.edges.retain(|_, edge| !edge.touches(key));
        Some(before - self.edges.len())
    }

    pub(crate) fn remove_edges_between(&mut self, from_key: &str, to_key: &str) -> usize {
        let before = self.edges.len();
        self.edges.retain(|_, edge| {
            !(keys_equal(edge.from_key(), from_key) && keys_equal(edge.to_key(), to_key))
        });
        before - self.edges.len()
    }
}

// =============================================================================
// GRAPH MAP
// =============================================================================

/// Thread-safe graph store. Share it through an `Arc`.
#[derive(Debug, Default)]
pub struct GraphMap {
    inner: Mutex<GraphTables>,
}

impl GraphMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> GraphMapBuilder {
        GraphMapBuilder::default()
    }

    /// Build a map from node and edge lists, in that order.
    ///
    /// Every entity is re-validated; duplicate node keys and duplicate
    /// edge ids are rejected.
    pub fn from_parts(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<Self, GraphError> {
        let mut tables = GraphTables::default();
        for node in nodes {
            node.validate()?;
            tables.insert_unique_node(node)?;
        }
        for edge in edges {
            edge.validate()?;
            if tables.edges.contains_key(&edge.id()) {
                return Err(GraphError::DuplicateEdge {
                    from_key: edge.from_key().to_string(),
                    to_key: edge.to_key().to_string(),
                    edge_type: edge.edge_type().to_string(),
                });
            }
            tables.insert_edge(edge);
        }
        Ok(Self::from_tables(tables))
    }

    fn from_tables(tables: GraphTables) -> Self {
        Self {
            inner: Mutex::new(tables),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, GraphTables>, GraphError> {
        self.inner.lock().map_err(|_| GraphError::Poisoned)
    }

    /// Independent copy of the current state.
    pub fn try_clone(&self) -> Result<Self, GraphError> {
        let tables = self.lock()?.clone();
        Ok(Self::from_tables(tables))
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Parse and run a command script. One result per statement.
    ///
    /// Parsing happens before the lock is taken; a parse error executes
    /// nothing. Execution stops at the first failing statement and earlier
    /// statements stay applied.
    pub fn execute(&self, command: &str) -> Result<Vec<QueryResult>, GraphError> {
        let instructions = parser::parse(command)?;
        self.execute_instructions(instructions)
    }

    /// Run a script and return the result of its last statement.
    pub fn query(&self, command: &str) -> Result<QueryResult, GraphError> {
        self.execute(command)?
            .pop()
            .ok_or_else(|| GraphError::parse(0, "empty command"))
    }

    pub fn execute_instructions(
        &self,
        instructions: Vec<Instruction>,
    ) -> Result<Vec<QueryResult>, GraphError> {
        let mut tables = self.lock()?;
        executor::execute(&mut tables, instructions)
    }

    // =========================================================================
    // DIRECT OPERATIONS
    // =========================================================================

    /// Insert or replace a node by key. Edges are not touched.
    pub fn add_node(&self, node: GraphNode) -> Result<(), GraphError> {
        self.lock()?.upsert_node(node);
        Ok(())
    }

    /// Insert a node; fails with `DuplicateNode` if the key exists.
    pub fn add_node_unique(&self, node: GraphNode) -> Result<(), GraphError> {
        self.lock()?.insert_unique_node(node)
    }

    /// Insert an edge under its generated id. Endpoints need not exist.
    pub fn add_edge(&self, edge: GraphEdge) -> Result<EdgeId, GraphError> {
        Ok(self.lock()?.insert_edge(edge))
    }

    /// Insert an edge; fails with `DuplicateEdge` when an edge with the
    /// same endpoints and type exists.
    pub fn add_edge_unique(&self, edge: GraphEdge) -> Result<EdgeId, GraphError> {
        self.lock()?.insert_unique_edge(edge)
    }

    pub fn upsert_edge(&self, edge: GraphEdge) -> Result<EdgeId, GraphError> {
        Ok(self.lock()?.upsert_edge(edge))
    }

    /// Remove a node and its incident edges in one step.
    ///
    /// Returns the cascade count, or `None` if no node has that key.
    pub fn remove_node(&self, key: &str) -> Result<Option<usize>, GraphError> {
        Ok(self.lock()?.remove_node(key))
    }

    /// Remove every edge from `from_key` to `to_key`. Returns the count.
    pub fn remove_edge(&self, from_key: &str, to_key: &str) -> Result<usize, GraphError> {
        Ok(self.lock()?.remove_edges_between(from_key, to_key))
    }

    pub fn remove_edge_by_id(&self, id: EdgeId) -> Result<Option<GraphEdge>, GraphError> {
        Ok(self.lock()?.edges.shift_remove(&id))
    }

    pub fn get_node(&self, key: &str) -> Result<Option<GraphNode>, GraphError> {
        Ok(self.lock()?.nodes.get(&normalize_key(key)).cloned())
    }

    pub fn get_edge(&self, id: EdgeId) -> Result<Option<GraphEdge>, GraphError> {
        Ok(self.lock()?.edges.get(&id).cloned())
    }

    pub fn node_count(&self) -> Result<usize, GraphError> {
        Ok(self.lock()?.nodes.len())
    }

    pub fn edge_count(&self) -> Result<usize, GraphError> {
        Ok(self.lock()?.edges.len())
    }

    /// Snapshot of all nodes in table order.
    pub fn nodes(&self) -> Result<Vec<GraphNode>, GraphError> {
        Ok(self.lock()?.nodes.values().cloned().collect())
    }

    /// Snapshot of all edges in table order.
    pub fn edges(&self) -> Result<Vec<GraphEdge>, GraphError> {
        Ok(self.lock()?.edges.values().cloned().collect())
    }

    /// All nodes, then all edges, as one sequence for bulk export.
    pub fn entities(&self) -> Result<Vec<GraphEntity>, GraphError> {
        let tables = self.lock()?;
        Ok(tables
            .nodes
            .values()
            .cloned()
            .map(GraphEntity::Node)
            .chain(tables.edges.values().cloned().map(GraphEntity::Edge))
            .collect())
    }

    pub fn clear(&self) -> Result<(), GraphError> {
        let mut tables = self.lock()?;
        tables.nodes.clear();
        tables.edges.clear();
        Ok(())
    }

    // =========================================================================
    // FORMATS
    // =========================================================================

    /// Encode the current state in the persistence format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GraphError> {
        let serializable = SerializableGraphMap::from(&*self.lock()?);
        map_to_bytes(&serializable)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
        Self::try_from(map_from_bytes(bytes)?)
    }

    /// JSON document with `nodes` and `edges` arrays.
    pub fn to_json(&self) -> Result<serde_json::Value, GraphError> {
        let tables = self.lock()?;
        Ok(formats::graph_to_json(
            tables.nodes.values(),
            tables.edges.values(),
        ))
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Collects nodes and edges, then validates them all in `build`.
#[derive(Debug, Default)]
pub struct GraphMapBuilder {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl GraphMapBuilder {
    #[must_use]
    pub fn node(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn edge(mut self, edge: GraphEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn build(self) -> Result<GraphMap, GraphError> {
        GraphMap::from_parts(self.nodes, self.edges)
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Serializable form of a `GraphMap`: both tables in table order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableGraphMap {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl From<&GraphTables> for SerializableGraphMap {
    fn from(tables: &GraphTables) -> Self {
        Self {
            nodes: tables.nodes.values().cloned().collect(),
            edges: tables.edges.values().cloned().collect(),
        }
    }
}

impl TryFrom<SerializableGraphMap> for GraphMap {
    type Error = GraphError;

    fn try_from(serializable: SerializableGraphMap) -> Result<Self, GraphError> {
        Self::from_parts(serializable.nodes, serializable.edges)
    }
}

// =============================================================================
// TESTS
// =============================================================================
