//! # Query Executor
//!
//! Runs parsed instructions against the tables while the caller holds the
//! map lock.
//!
//! A search chain keeps one `current` set. The first stage scans its whole
//! table; every later stage only considers elements connected to
//! `current` and then replaces it. Results always come out in table
//! insertion order, whatever the chain shape.

use crate::instruction::{
    CreateMode, Delete, Direction, EdgeCreate, EdgeSearch, Instruction, NodeCreate, NodeSearch,
    Select, Update, UpdateSet,
};
use crate::map::GraphTables;
use crate::types::{GraphEdge, GraphError, GraphNode, normalize_key};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::debug;

// =============================================================================
// RESULTS
// =============================================================================

/// Statement category of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Select,
    Create,
    Update,
    Delete,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Materialized nodes or edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResultSet {
    #[default]
    Empty,
    Nodes(Vec<GraphNode>),
    Edges(Vec<GraphEdge>),
}

impl ResultSet {
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Nodes(nodes) => nodes.len(),
            Self::Edges(edges) => edges.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodes(&self) -> &[GraphNode] {
        match self {
            Self::Nodes(nodes) => nodes,
            _ => &[],
        }
    }

    pub fn edges(&self) -> &[GraphEdge] {
        match self {
            Self::Edges(edges) => edges,
            _ => &[],
        }
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub kind: CommandKind,
    /// Final set of the statement: matches for `select`, the written or
    /// removed entities for mutations.
    pub items: ResultSet,
    /// Lowercased alias -> snapshot taken when that stage completed.
    pub aliases: IndexMap<String, ResultSet>,
    /// Number of entities written or removed. Zero for `select`.
    pub affected: usize,
}

impl QueryResult {
    fn new(kind: CommandKind, items: ResultSet, affected: usize) -> Self {
        Self {
            kind,
            items,
            aliases: IndexMap::new(),
            affected,
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        self.items.nodes()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        self.items.edges()
    }

    /// Case-insensitive alias lookup.
    pub fn alias(&self, name: &str) -> Option<&ResultSet> {
        self.aliases.get(&normalize_key(name))
    }
}

// =============================================================================
// CHAIN STATE
// =============================================================================

/// Positions into the node or edge table, ascending.
#[derive(Debug, Clone)]
enum Current {
    Start,
    Nodes(Vec<usize>),
    Edges(Vec<usize>),
}

impl Current {
    fn materialize(&self, tables: &GraphTables) -> ResultSet {
        match self {
            Self::Start => ResultSet::Empty,
            Self::Nodes(positions) => ResultSet::Nodes(
                positions
                    .iter()
                    .filter_map(|&i| tables.nodes.get_index(i).map(|(_, n)| n.clone()))
                    .collect(),
            ),
            Self::Edges(positions) => ResultSet::Edges(
                positions
                    .iter()
                    .filter_map(|&i| tables.edges.get_index(i).map(|(_, e)| e.clone()))
                    .collect(),
            ),
        }
    }
}

struct ChainOutput {
    current: Current,
    aliases: IndexMap<String, ResultSet>,
}

/// Normalized keys reached from `current` when stepping in `direction`.
///
/// From nodes: the far end of every edge walked from one of them. From
/// edges: the far end of each of their walks, so `->` yields both
/// endpoints.
fn reached_keys(tables: &GraphTables, current: &Current, direction: Direction) -> HashSet<String> {
    match current {
        Current::Start => HashSet::new(),
        Current::Nodes(_) => {
            let sources = source_keys(tables, current);
            tables
                .edges
                .values()
                .flat_map(|edge| direction.walks(edge))
                .filter(|(near, _)| sources.contains(&normalize_key(near)))
                .map(|(_, far)| normalize_key(far))
                .collect()
        }
        Current::Edges(positions) => positions
            .iter()
            .filter_map(|&i| tables.edges.get_index(i))
            .flat_map(|(_, edge)| direction.walks(edge))
            .map(|(_, far)| normalize_key(far))
            .collect(),
    }
}

/// True if `edge` can be entered from one of `keys` in `direction`.
fn enters_from(edge: &GraphEdge, direction: Direction, keys: &HashSet<String>) -> bool {
    direction
        .walks(edge)
        .any(|(near, _)| keys.contains(&normalize_key(near)))
}

/// Normalized keys an edge stage may start from.
fn source_keys(tables: &GraphTables, current: &Current) -> HashSet<String> {
    match current {
        Current::Nodes(positions) => positions
            .iter()
            .filter_map(|&i| tables.nodes.get_index(i))
            .map(|(key, _)| key.clone())
            .collect(),
        Current::Edges(_) | Current::Start => HashSet::new(),
    }
}

fn run_node_stage(tables: &GraphTables, current: &Current, search: &NodeSearch) -> Current {
    let positions = match current {
        Current::Start => tables
            .nodes
            .values()
            .enumerate()
            .filter(|(_, node)| search.is_match(node))
            .map(|(i, _)| i)
            .collect(),
        _ => {
            let reached = reached_keys(tables, current, search.direction);
            tables
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, (key, node))| reached.contains(*key) && search.is_match(node))
                .map(|(i, _)| i)
                .collect()
        }
    };
    Current::Nodes(positions)
}

fn run_edge_stage(tables: &GraphTables, current: &Current, search: &EdgeSearch) -> Current {
    let sources = match current {
        Current::Start => None,
        Current::Nodes(_) => Some(source_keys(tables, current)),
        // Continue from where the previous edges lead
        Current::Edges(_) => Some(reached_keys(tables, current, search.direction)),
    };
    let positions = tables
        .edges
        .values()
        .enumerate()
        .filter(|(_, edge)| {
            sources
                .as_ref()
                .is_none_or(|keys| enters_from(edge, search.direction, keys))
                && search.is_match(edge)
        })
        .map(|(i, _)| i)
        .collect();
    Current::Edges(positions)
}

fn record_alias(
    aliases: &mut IndexMap<String, ResultSet>,
    alias: Option<&str>,
    tables: &GraphTables,
    current: &Current,
) {
    if let Some(alias) = alias {
        aliases.insert(normalize_key(alias), current.materialize(tables));
    }
}

/// Evaluate a search chain. Nested selects expand inline.
fn run_chain(tables: &GraphTables, select: &Select) -> Result<ChainOutput, GraphError> {
    let mut stack: Vec<&Instruction> = select.stages.iter().rev().collect();
    let mut current = Current::Start;
    let mut aliases = IndexMap::new();

    while let Some(stage) = stack.pop() {
        match stage {
            Instruction::Select(nested) => stack.extend(nested.stages.iter().rev()),
            Instruction::NodeSearch(search) => {
                current = run_node_stage(tables, &current, search);
                record_alias(&mut aliases, search.alias.as_deref(), tables, &current);
            }
            Instruction::EdgeSearch(search) => {
                current = run_edge_stage(tables, &current, search);
                record_alias(&mut aliases, search.alias.as_deref(), tables, &current);
            }
            Instruction::NodeCreate(_)
            | Instruction::EdgeCreate(_)
            | Instruction::Update(_)
            | Instruction::Delete(_) => {
                return Err(GraphError::parse(
                    0,
                    format!("'{}' cannot be used as a search stage", stage),
                ));
            }
        }
    }

    Ok(ChainOutput { current, aliases })
}

// =============================================================================
// STATEMENTS
// =============================================================================

/// Run instructions in source order, stopping at the first error.
pub(crate) fn execute(
    tables: &mut GraphTables,
    instructions: Vec<Instruction>,
) -> Result<Vec<QueryResult>, GraphError> {
    let mut results = Vec::with_capacity(instructions.len());
    for instruction in instructions {
        debug!(statement = %instruction, "executing statement");
        let result = execute_statement(tables, instruction)?;
        debug!(
            kind = result.kind.as_str(),
            items = result.items.len(),
            affected = result.affected,
            "statement complete"
        );
        results.push(result);
    }
    Ok(results)
}

fn execute_statement(
    tables: &mut GraphTables,
    instruction: Instruction,
) -> Result<QueryResult, GraphError> {
    match instruction {
        Instruction::Select(select) => execute_select(tables, &select),
        Instruction::NodeSearch(search) => {
            execute_select(tables, &Select::new(vec![Instruction::NodeSearch(search)]))
        }
        Instruction::EdgeSearch(search) => {
            execute_select(tables, &Select::new(vec![Instruction::EdgeSearch(search)]))
        }
        Instruction::NodeCreate(create) => execute_node_create(tables, &create),
        Instruction::EdgeCreate(create) => execute_edge_create(tables, &create),
        Instruction::Update(update) => execute_update(tables, &update),
        Instruction::Delete(delete) => execute_delete(tables, &delete),
    }
}

fn execute_select(tables: &GraphTables, select: &Select) -> Result<QueryResult, GraphError> {
    let output = run_chain(tables, select)?;
    let mut result = QueryResult::new(
        CommandKind::Select,
        output.current.materialize(tables),
        0,
    );
    result.aliases = output.aliases;
    Ok(result)
}

fn execute_node_create(
    tables: &mut GraphTables,
    create: &NodeCreate,
) -> Result<QueryResult, GraphError> {
    let node = create.to_node()?;
    match create.mode {
        CreateMode::Unique => tables.insert_unique_node(node.clone())?,
        CreateMode::Add | CreateMode::Upsert => tables.upsert_node(node.clone()),
    }
    Ok(QueryResult::new(
        CommandKind::Create,
        ResultSet::Nodes(vec![node]),
        1,
    ))
}

fn execute_edge_create(
    tables: &mut GraphTables,
    create: &EdgeCreate,
) -> Result<QueryResult, GraphError> {
    let edge = create.to_edge()?;
    let id = match create.mode() {
        CreateMode::Add => tables.insert_edge(edge),
        CreateMode::Unique => tables.insert_unique_edge(edge)?,
        CreateMode::Upsert => tables.upsert_edge(edge),
    };
    let stored: Vec<GraphEdge> = tables.edges.get(&id).cloned().into_iter().collect();
    Ok(QueryResult::new(
        CommandKind::Create,
        ResultSet::Edges(stored),
        1,
    ))
}

/// Compute every replacement first, then write them all, so a failing
/// value leaves the tables untouched.
fn execute_update(tables: &mut GraphTables, update: &Update) -> Result<QueryResult, GraphError> {
    let ChainOutput { current, aliases } = run_chain(tables, &update.select)?;
    let set: &UpdateSet = &update.set;

    let items = match current {
        Current::Start => ResultSet::Empty,
        Current::Nodes(positions) => {
            let mut updated = Vec::with_capacity(positions.len());
            for &i in &positions {
                let Some((_, node)) = tables.nodes.get_index(i) else {
                    continue;
                };
                let mut node = node.clone();
                if let Some(tags) = &set.tags {
                    node.set_tags(tags.clone());
                }
                if let Some(entity) = &set.entity {
                    node.set_entity(entity.clone())?;
                }
                updated.push((i, node));
            }
            for (i, node) in &updated {
                if let Some((_, slot)) = tables.nodes.get_index_mut(*i) {
                    *slot = node.clone();
                }
            }
            ResultSet::Nodes(updated.into_iter().map(|(_, n)| n).collect())
        }
        Current::Edges(positions) => {
            let mut updated = Vec::with_capacity(positions.len());
            for &i in &positions {
                let Some((_, edge)) = tables.edges.get_index(i) else {
                    continue;
                };
                let mut edge = edge.clone();
                if let Some(tags) = &set.tags {
                    edge.set_tags(tags.clone());
                }
                if let Some(edge_type) = &set.edge_type {
                    edge.set_edge_type(edge_type.clone())?;
                }
                updated.push((i, edge));
            }
            for (i, edge) in &updated {
                if let Some((_, slot)) = tables.edges.get_index_mut(*i) {
                    *slot = edge.clone();
                }
            }
            ResultSet::Edges(updated.into_iter().map(|(_, e)| e).collect())
        }
    };

    let affected = items.len();
    let mut result = QueryResult::new(CommandKind::Update, items, affected);
    result.aliases = aliases;
    Ok(result)
}

fn execute_delete(tables: &mut GraphTables, delete: &Delete) -> Result<QueryResult, GraphError> {
    let ChainOutput { current, aliases } = run_chain(tables, &delete.select)?;
    let removed = current.materialize(tables);

    match &removed {
        ResultSet::Empty => {}
        ResultSet::Nodes(nodes) => {
            let keys: HashSet<String> = nodes.iter().map(|n| normalize_key(n.key())).collect();
            tables.nodes.retain(|key, _| !keys.contains(key));
            tables.edges.retain(|_, edge| {
                !keys.contains(&normalize_key(edge.from_key()))
                    && !keys.contains(&normalize_key(edge.to_key()))
            });
        }
        ResultSet::Edges(edges) => {
            let ids: HashSet<_> = edges.iter().map(GraphEdge::id).collect();
            tables.edges.retain(|id, _| !ids.contains(id));
        }
    }

    let affected = removed.len();
    let mut result = QueryResult::new(CommandKind::Delete, removed, affected);
    result.aliases = aliases;
    Ok(result)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(tables: &mut GraphTables, command: &str) -> Vec<QueryResult> {
        execute(tables, parse(command).expect("parse")).expect("execute")
    }

    fn last(tables: &mut GraphTables, command: &str) -> QueryResult {
        run(tables, command).pop().expect("result")
    }

    fn keys(result: &QueryResult) -> Vec<&str> {
        result.nodes().iter().map(GraphNode::key).collect()
    }

    fn links(result: &QueryResult) -> Vec<(&str, &str)> {
        result
            .edges()
            .iter()
            .map(|e| (e.from_key(), e.to_key()))
            .collect()
    }

    /// a -> b -> c, a -> c, d isolated
    fn chain_tables() -> GraphTables {
        let mut tables = GraphTables::default();
        run(
            &mut tables,
            "upsert node key=a; upsert node key=b; upsert node key=c; upsert node key=d;
             add edge fromKey=a, toKey=b, edgeType=next;
             add edge fromKey=b, toKey=c, edgeType=next;
             add edge fromKey=a, toKey=c, edgeType=skip;",
        );
        tables
    }

    #[test]
    fn first_stage_scans_whole_table() {
        let mut tables = chain_tables();
        let result = last(&mut tables, "select (*);");
        assert_eq!(result.kind, CommandKind::Select);
        assert_eq!(keys(&result), vec!["a", "b", "c", "d"]);
        assert!(result.aliases.is_empty());
    }

    #[test]
    fn node_to_edge_to_node_shares_endpoints() {
        let mut tables = chain_tables();
        let result = last(&mut tables, "select (key=a) -> [next] -> (*);");
        assert_eq!(keys(&result), vec!["a", "b"]);

        let result = last(&mut tables, "select (key=c) -> [*];");
        assert_eq!(links(&result), vec![("b", "c"), ("a", "c")]);
    }

    #[test]
    fn directed_connectors_follow_edge_direction() {
        let mut tables = chain_tables();
        let result = last(&mut tables, "select (key=a) ->> [next] ->> (*);");
        assert_eq!(keys(&result), vec!["b"]);

        let result = last(&mut tables, "select (key=c) ->> [*];");
        assert!(result.items.is_empty());

        let result = last(&mut tables, "select (key=c) <- [*] <- (*);");
        assert_eq!(keys(&result), vec!["a", "b"]);
    }

    #[test]
    fn node_to_node_uses_adjacency() {
        let mut tables = chain_tables();
        let result = last(&mut tables, "select (key=a) -> (*);");
        assert_eq!(keys(&result), vec!["b", "c"]);
        let result = last(&mut tables, "select (key=c) -> (*);");
        assert_eq!(keys(&result), vec!["a", "b"]);
        let result = last(&mut tables, "select (key=c) ->> (*);");
        assert!(result.items.is_empty());
        let result = last(&mut tables, "select (key=a) <- (*);");
        assert!(result.items.is_empty());
        let result = last(&mut tables, "select (key=d) -> (*);");
        assert!(result.items.is_empty());
    }

    #[test]
    fn edge_to_edge_shares_endpoints() {
        let mut tables = chain_tables();
        let result = last(&mut tables, "select [fromKey=a;next] -> [*];");
        assert_eq!(links(&result), vec![("a", "b"), ("b", "c"), ("a", "c")]);
        let result = last(&mut tables, "select [fromKey=a;next] ->> [*];");
        assert_eq!(links(&result), vec![("b", "c")]);
        let result = last(&mut tables, "select [toKey=c;skip] <- [*];");
        assert!(result.items.is_empty());
    }

    #[test]
    fn aliases_snapshot_each_stage() {
        let mut tables = chain_tables();
        let result = last(
            &mut tables,
            "select (key=a) as Start -> [*] as rel -> (*) as friends;",
        );
        assert_eq!(result.aliases.len(), 3);
        assert_eq!(result.alias("start").map(ResultSet::len), Some(1));
        assert_eq!(result.alias("REL").map(ResultSet::len), Some(2));
        assert_eq!(result.alias("friends"), Some(&result.items));
    }

    #[test]
    fn join_output_is_in_table_order() {
        let mut tables = GraphTables::default();
        run(
            &mut tables,
            "upsert node key=z; upsert node key=y; upsert node key=x;
             add edge fromKey=x, toKey=z; add edge fromKey=x, toKey=y;",
        );
        let result = last(&mut tables, "select (key=x) -> (*);");
        assert_eq!(keys(&result), vec!["z", "y"]);
    }

    #[test]
    fn update_replaces_tags_and_type() {
        let mut tables = chain_tables();
        let result = last(&mut tables, "update (key=a|b) set tags='seen=1';");
        assert_eq!(result.kind, CommandKind::Update);
        assert_eq!(result.affected, 2);

        let seen = last(&mut tables, "select (seen=1);");
        assert_eq!(keys(&seen), vec!["a", "b"]);

        last(&mut tables, "update [skip] set edgeType=jump;");
        assert_eq!(last(&mut tables, "select [jump];").edges().len(), 1);
        assert!(last(&mut tables, "select [skip];").items.is_empty());
    }

    #[test]
    fn delete_nodes_cascades_edges() {
        let mut tables = chain_tables();
        let result = last(&mut tables, "delete (key=b);");
        assert_eq!(result.affected, 1);
        assert_eq!(tables.nodes.len(), 3);
        assert_eq!(tables.edges.len(), 1);
    }

    #[test]
    fn delete_edges_keeps_nodes() {
        let mut tables = chain_tables();
        let result = last(&mut tables, "delete [next];");
        assert_eq!(result.affected, 2);
        assert_eq!(tables.nodes.len(), 4);
        assert_eq!(tables.edges.len(), 1);
    }

    #[test]
    fn unique_create_stops_script_but_keeps_earlier_statements() {
        let mut tables = GraphTables::default();
        let err = execute(
            &mut tables,
            parse("add unique node key=a; add unique node key=A; upsert node key=b;")
                .expect("parse"),
        )
        .expect_err("duplicate");
        assert_eq!(err, GraphError::DuplicateNode("A".to_string()));
        assert_eq!(tables.nodes.len(), 1);
    }

    #[test]
    fn upsert_edge_statement_replaces_tags() {
        let mut tables = chain_tables();
        let before = tables.edges.len();
        let result = last(
            &mut tables,
            "upsert edge fromKey=a, toKey=b, edgeType=next, tags='weight=3';",
        );
        assert_eq!(tables.edges.len(), before);
        assert_eq!(result.edges()[0].tags().to_string(), "weight=3");
    }
}
