//! # JSON Rendering
//!
//! serde_json views of nodes, edges and query results. Entities are
//! rendered as standard base64.

use crate::executor::{QueryResult, ResultSet};
use crate::tags::Tags;
use crate::types::{GraphEdge, GraphNode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

fn tags_to_json(tags: &Tags) -> Value {
    let mut object = Map::new();
    for tag in tags.iter() {
        let value = tag.value().map_or(Value::Null, |v| Value::String(v.to_string()));
        object.insert(tag.key().to_string(), value);
    }
    Value::Object(object)
}

pub fn node_to_json(node: &GraphNode) -> Value {
    json!({
        "key": node.key(),
        "tags": tags_to_json(node.tags()),
        "entity": node.entity().map(|e| BASE64.encode(e)),
    })
}

pub fn edge_to_json(edge: &GraphEdge) -> Value {
    json!({
        "id": edge.id().to_string(),
        "fromKey": edge.from_key(),
        "toKey": edge.to_key(),
        "edgeType": edge.edge_type(),
        "tags": tags_to_json(edge.tags()),
    })
}

fn result_set_to_json(set: &ResultSet) -> Value {
    match set {
        ResultSet::Empty => Value::Array(Vec::new()),
        ResultSet::Nodes(nodes) => Value::Array(nodes.iter().map(node_to_json).collect()),
        ResultSet::Edges(edges) => Value::Array(edges.iter().map(edge_to_json).collect()),
    }
}

/// `{ "nodes": [...], "edges": [...] }` in table order.
pub fn graph_to_json<'a>(
    nodes: impl Iterator<Item = &'a GraphNode>,
    edges: impl Iterator<Item = &'a GraphEdge>,
) -> Value {
    json!({
        "nodes": nodes.map(node_to_json).collect::<Vec<_>>(),
        "edges": edges.map(edge_to_json).collect::<Vec<_>>(),
    })
}

pub fn result_to_json(result: &QueryResult) -> Value {
    let kind = match &result.items {
        ResultSet::Empty => "empty",
        ResultSet::Nodes(_) => "nodes",
        ResultSet::Edges(_) => "edges",
    };
    let aliases: Map<String, Value> = result
        .aliases
        .iter()
        .map(|(name, set)| (name.clone(), result_set_to_json(set)))
        .collect();
    json!({
        "command": result.kind.as_str(),
        "affected": result.affected,
        "kind": kind,
        "items": result_set_to_json(&result.items),
        "aliases": aliases,
    })
}
