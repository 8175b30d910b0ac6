//! # Instruction Model
//!
//! Parsed statements as a closed set of variants. Every instruction
//! renders back to canonical command text through `Display`, and search
//! instructions expose pure match predicates the executor evaluates
//! under the map lock.

use crate::lexer::is_value_char;
use crate::primitives::DEFAULT_EDGE_TYPE;
use crate::tags::{Tags, wildcard_match};
use crate::types::{GraphEdge, GraphError, GraphNode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::borrow::Cow;
use std::fmt;

// =============================================================================
// RENDERING HELPERS
// =============================================================================

/// Render `text` bare when the lexer would read it back as one value,
/// quoted otherwise.
pub(crate) fn quote_if_needed(text: &str) -> Cow<'_, str> {
    let bare = !text.is_empty()
        && text.chars().all(is_value_char)
        && !text.contains("->")
        && !text.contains("<-");
    if bare {
        Cow::Borrowed(text)
    } else if text.contains('\'') {
        Cow::Owned(format!("\"{}\"", text))
    } else {
        Cow::Owned(format!("'{}'", text))
    }
}

fn write_entity(f: &mut fmt::Formatter<'_>, entity: &[u8]) -> fmt::Result {
    write!(f, "entity {{ '{}' }}", BASE64.encode(entity))
}

fn write_alias(f: &mut fmt::Formatter<'_>, alias: Option<&str>) -> fmt::Result {
    match alias {
        Some(alias) => write!(f, " as {}", quote_if_needed(alias)),
        None => Ok(()),
    }
}

// =============================================================================
// PATTERN
// =============================================================================

/// One or more `|`-separated alternatives, each exact or wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    alternatives: Vec<String>,
}

impl Pattern {
    pub fn new(alternatives: Vec<String>) -> Self {
        Self { alternatives }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self::new(vec![value.into()])
    }

    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.alternatives.iter().any(|alt| wildcard_match(alt, text))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, alt) in self.alternatives.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(&quote_if_needed(alt))?;
        }
        Ok(())
    }
}

/// How a stage connects to the stage before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// `->`: elements sharing an endpoint, either way round.
    #[default]
    Any,
    /// `->>`: follow edges from `fromKey` to `toKey`.
    Outgoing,
    /// `<-`: follow edges from `toKey` back to `fromKey`.
    Incoming,
}

impl Direction {
    /// `(near, far)` endpoint pairs an edge can be walked along.
    pub fn walks<'e>(self, edge: &'e GraphEdge) -> impl Iterator<Item = (&'e str, &'e str)> {
        let forward = (edge.from_key(), edge.to_key());
        let backward = (edge.to_key(), edge.from_key());
        let (first, second) = match self {
            Self::Any => (Some(forward), Some(backward)),
            Self::Outgoing => (Some(forward), None),
            Self::Incoming => (Some(backward), None),
        };
        first.into_iter().chain(second)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "->",
            Self::Outgoing => "->>",
            Self::Incoming => "<-",
        })
    }
}

// =============================================================================
// SEARCH INSTRUCTIONS
// =============================================================================

/// `( ... )` stage: nodes by key pattern and tags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSearch {
    pub key: Option<Pattern>,
    pub tags: Tags,
    pub alias: Option<String>,
    pub direction: Direction,
}

impl NodeSearch {
    /// `(*)`
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(Pattern::exact(key)),
            ..Self::default()
        }
    }

    pub fn is_match(&self, node: &GraphNode) -> bool {
        self.key.as_ref().is_none_or(|p| p.is_match(node.key())) && node.tags().has_all(&self.tags)
    }
}

impl fmt::Display for NodeSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut predicates = Vec::new();
        if let Some(key) = &self.key {
            predicates.push(format!("key={}", key));
        }
        if !self.tags.is_empty() {
            predicates.push(format!("tags={}", quote_if_needed(&self.tags.to_string())));
        }
        if predicates.is_empty() {
            predicates.push("*".to_string());
        }
        write!(f, "({})", predicates.join(";"))?;
        write_alias(f, self.alias.as_deref())
    }
}

/// `[ ... ]` stage: edges by id, endpoints, type and tags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EdgeSearch {
    /// Pattern over the generated edge id.
    pub key: Option<Pattern>,
    pub from_key: Option<Pattern>,
    pub to_key: Option<Pattern>,
    pub edge_type: Option<Pattern>,
    pub tags: Tags,
    pub alias: Option<String>,
    pub direction: Direction,
}

impl EdgeSearch {
    /// `[*]`
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_type(edge_type: impl Into<String>) -> Self {
        Self {
            edge_type: Some(Pattern::exact(edge_type)),
            ..Self::default()
        }
    }

    pub fn is_match(&self, edge: &GraphEdge) -> bool {
        let matches = |pattern: &Option<Pattern>, text: &str| {
            pattern.as_ref().is_none_or(|p| p.is_match(text))
        };
        matches(&self.key, &edge.id().to_string())
            && matches(&self.from_key, edge.from_key())
            && matches(&self.to_key, edge.to_key())
            && matches(&self.edge_type, edge.edge_type())
            && edge.tags().has_all(&self.tags)
    }
}

impl fmt::Display for EdgeSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut predicates = Vec::new();
        let fields = [
            ("key", &self.key),
            ("fromKey", &self.from_key),
            ("toKey", &self.to_key),
            ("edgeType", &self.edge_type),
        ];
        for (name, pattern) in fields {
            if let Some(pattern) = pattern {
                predicates.push(format!("{}={}", name, pattern));
            }
        }
        if !self.tags.is_empty() {
            predicates.push(format!("tags={}", quote_if_needed(&self.tags.to_string())));
        }
        if predicates.is_empty() {
            predicates.push("*".to_string());
        }
        write!(f, "[{}]", predicates.join(";"))?;
        write_alias(f, self.alias.as_deref())
    }
}

/// Result kind produced by a search stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Nodes,
    Edges,
}

/// Ordered list of search stages; each stage after the first is joined
/// to the result of the stage before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub stages: Vec<Instruction>,
}

impl Select {
    pub fn new(stages: Vec<Instruction>) -> Self {
        Self { stages }
    }

    /// Kind of the last stage, which is the kind of the whole result.
    pub fn final_kind(&self) -> Option<StageKind> {
        match self.stages.last()? {
            Instruction::NodeSearch(_) => Some(StageKind::Nodes),
            Instruction::EdgeSearch(_) => Some(StageKind::Edges),
            Instruction::Select(nested) => nested.final_kind(),
            _ => None,
        }
    }

    fn write_chain(&self, f: &mut fmt::Formatter<'_>, first: &mut bool) -> fmt::Result {
        for stage in &self.stages {
            match stage {
                Instruction::Select(nested) => nested.write_chain(f, first)?,
                Instruction::NodeSearch(search) => {
                    if !*first {
                        write!(f, " {} ", search.direction)?;
                    }
                    write!(f, "{}", search)?;
                    *first = false;
                }
                Instruction::EdgeSearch(search) => {
                    if !*first {
                        write!(f, " {} ", search.direction)?;
                    }
                    write!(f, "{}", search)?;
                    *first = false;
                }
                // Mutations never appear as stages
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_chain(f, &mut true)
    }
}

// =============================================================================
// CREATE INSTRUCTIONS
// =============================================================================

/// How a create statement treats an existing match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// `add`: nodes upsert, edges always insert a new edge.
    Add,
    /// `add unique`: reject when the identity already exists.
    Unique,
    /// `upsert`: replace the existing entity in place.
    Upsert,
}

impl CreateMode {
    fn keyword(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Unique => "add unique",
            Self::Upsert => "upsert",
        }
    }
}

/// `add|upsert node key=K[, tags][, entity { ... }]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCreate {
    pub key: String,
    pub tags: Tags,
    pub entity: Option<Vec<u8>>,
    pub mode: CreateMode,
}

impl NodeCreate {
    /// Build the node this instruction inserts.
    pub fn to_node(&self) -> Result<GraphNode, GraphError> {
        let node = GraphNode::new(self.key.clone())?.with_tags(self.tags.clone());
        match &self.entity {
            Some(entity) => node.with_entity(entity.clone()),
            None => Ok(node),
        }
    }
}

impl fmt::Display for NodeCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node key={}", self.mode.keyword(), quote_if_needed(&self.key))?;
        if !self.tags.is_empty() {
            write!(f, ", tags={}", quote_if_needed(&self.tags.to_string()))?;
        }
        if let Some(entity) = &self.entity {
            f.write_str(", ")?;
            write_entity(f, entity)?;
        }
        f.write_str(";")
    }
}

/// `add [unique]|upsert edge fromKey=F, toKey=T[, edgeType=E][, tags]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeCreate {
    from_key: String,
    to_key: String,
    edge_type: String,
    tags: Tags,
    mode: CreateMode,
}

impl EdgeCreate {
    /// Fails with `GraphError::InvalidEdge` when both endpoints are equal.
    pub fn new(
        from_key: impl Into<String>,
        to_key: impl Into<String>,
        edge_type: Option<String>,
        tags: Tags,
        mode: CreateMode,
    ) -> Result<Self, GraphError> {
        let create = Self {
            from_key: from_key.into(),
            to_key: to_key.into(),
            edge_type: edge_type.unwrap_or_else(|| DEFAULT_EDGE_TYPE.to_string()),
            tags,
            mode,
        };
        // Run the edge constructor once so invariant failures surface now
        create.to_edge()?;
        Ok(create)
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

    pub fn mode(&self) -> CreateMode {
        self.mode
    }

    pub fn is_unique(&self) -> bool {
        self.mode == CreateMode::Unique
    }

    /// Build a new edge (fresh id) for this instruction.
    pub fn to_edge(&self) -> Result<GraphEdge, GraphError> {
        Ok(GraphEdge::new(self.from_key.clone(), self.to_key.clone())?
            .with_edge_type(self.edge_type.clone())?
            .with_tags(self.tags.clone()))
    }
}

impl fmt::Display for EdgeCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} edge fromKey={}, toKey={}, edgeType={}",
            self.mode.keyword(),
            quote_if_needed(&self.from_key),
            quote_if_needed(&self.to_key),
            quote_if_needed(&self.edge_type)
        )?;
        if !self.tags.is_empty() {
            write!(f, ", tags={}", quote_if_needed(&self.tags.to_string()))?;
        }
        f.write_str(";")
    }
}

// =============================================================================
// MUTATING SEARCHES
// =============================================================================

/// Replacement values applied by `update ... set`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateSet {
    pub tags: Option<Tags>,
    pub edge_type: Option<String>,
    pub entity: Option<Vec<u8>>,
}

impl UpdateSet {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.edge_type.is_none() && self.entity.is_none()
    }
}

/// `update <chain> set ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub select: Select,
    pub set: UpdateSet,
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update {} set ", self.select)?;
        let mut parts: Vec<String> = Vec::new();
        if let Some(tags) = &self.set.tags {
            parts.push(format!("tags={}", quote_if_needed(&tags.to_string())));
        }
        if let Some(edge_type) = &self.set.edge_type {
            parts.push(format!("edgeType={}", quote_if_needed(edge_type)));
        }
        f.write_str(&parts.join(", "))?;
        if let Some(entity) = &self.set.entity {
            if !parts.is_empty() {
                f.write_str(", ")?;
            }
            write_entity(f, entity)?;
        }
        f.write_str(";")
    }
}

/// `delete <chain>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub select: Select,
}

impl fmt::Display for Delete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delete {};", self.select)
    }
}

// =============================================================================
// INSTRUCTION
// =============================================================================

/// Closed set of instructions the executor understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    NodeSearch(NodeSearch),
    EdgeSearch(EdgeSearch),
    Select(Select),
    NodeCreate(NodeCreate),
    EdgeCreate(EdgeCreate),
    Update(Update),
    Delete(Delete),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeSearch(search) => write!(f, "select {};", search),
            Self::EdgeSearch(search) => write!(f, "select {};", search),
            Self::Select(select) => write!(f, "select {};", select),
            Self::NodeCreate(create) => write!(f, "{}", create),
            Self::EdgeCreate(create) => write!(f, "{}", create),
            Self::Update(update) => write!(f, "{}", update),
            Self::Delete(delete) => write!(f, "{}", delete),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
