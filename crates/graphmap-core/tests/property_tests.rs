//! # Property-Based Tests
//!
//! Structural invariants of `GraphMap` under arbitrary input.

use graphmap_core::{GraphEdge, GraphMap, GraphNode, Tags, normalize_key, wildcard_match};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_:]{0,8}"
}

fn build_map(keys: &[String], links: &[(usize, usize)]) -> GraphMap {
    let map = GraphMap::new();
    for key in keys {
        map.add_node(GraphNode::new(key.clone()).expect("node"))
            .expect("add");
    }
    for &(from, to) in links {
        let (from, to) = (&keys[from % keys.len()], &keys[to % keys.len()]);
        if let Ok(edge) = GraphEdge::new(from.clone(), to.clone()) {
            map.add_edge(edge).expect("add edge");
        }
    }
    map
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// An edge whose endpoints normalize to the same key is never created.
    #[test]
    fn self_loops_are_always_rejected(key in key_strategy()) {
        prop_assert!(GraphEdge::new(key.clone(), key.to_uppercase()).is_err());

        let map = GraphMap::new();
        let command = format!("add edge fromKey={key}, toKey={key};");
        prop_assert!(map.execute(&command).is_err());
        prop_assert_eq!(map.edge_count().expect("count"), 0);
    }

    /// Upserting the same key any number of times leaves one node.
    #[test]
    fn repeated_upserts_keep_one_node(key in key_strategy(), times in 1usize..20) {
        let map = GraphMap::new();
        for i in 0..times {
            let command = format!("upsert node key={key}, tags='n={i}';");
            map.execute(&command).expect("upsert");
        }
        prop_assert_eq!(map.node_count().expect("count"), 1);
        let node = map.get_node(&key).expect("get").expect("present");
        let last = format!("n={}", times - 1);
        prop_assert_eq!(node.tags().to_string(), last);
    }

    /// Node count equals the number of distinct normalized keys.
    #[test]
    fn node_count_reflects_distinct_keys(keys in vec(key_strategy(), 0..40)) {
        let map = GraphMap::new();
        for key in &keys {
            map.add_node(GraphNode::new(key.clone()).expect("node")).expect("add");
        }
        let distinct = keys.iter().map(|k| normalize_key(k)).collect::<BTreeSet<_>>();
        prop_assert_eq!(map.node_count().expect("count"), distinct.len());
    }

    /// Removing a node leaves no edge that references it.
    #[test]
    fn remove_node_leaves_no_dangling_edges(
        keys in vec(key_strategy(), 2..12),
        links in vec((0usize..12, 0usize..12), 0..40),
        victim in 0usize..12,
    ) {
        let map = build_map(&keys, &links);
        let victim = keys[victim % keys.len()].clone();
        let before = map.edge_count().expect("count");
        let touching = map
            .edges()
            .expect("edges")
            .iter()
            .filter(|e| e.touches(&victim))
            .count();

        let removed = map.remove_node(&victim).expect("remove");
        prop_assert_eq!(removed, Some(touching));
        prop_assert_eq!(map.edge_count().expect("count"), before - touching);
        prop_assert!(map.edges().expect("edges").iter().all(|e| !e.touches(&victim)));
        prop_assert!(map.get_node(&victim).expect("get").is_none());
    }

    /// The binary snapshot restores both tables in order.
    #[test]
    fn bytes_roundtrip_preserves_tables(
        keys in vec(key_strategy(), 0..12),
        links in vec((0usize..12, 0usize..12), 0..30),
        tags in "[a-z]{1,5}(=[a-z0-9]{1,5})?",
    ) {
        let map = if keys.is_empty() { GraphMap::new() } else { build_map(&keys, &links) };
        if let Some(first) = keys.first() {
            map.add_node(
                GraphNode::new(first.clone()).expect("node").with_tags(Tags::parse(&tags)),
            )
            .expect("upsert");
        }

        let bytes = map.to_bytes().expect("encode");
        let restored = GraphMap::from_bytes(&bytes).expect("decode");
        prop_assert_eq!(restored.nodes().expect("nodes"), map.nodes().expect("nodes"));
        prop_assert_eq!(restored.edges().expect("edges"), map.edges().expect("edges"));
        prop_assert_eq!(restored.to_bytes().expect("encode"), bytes);
    }

    /// A pattern without wildcards matches exactly its case-folded text.
    #[test]
    fn literal_patterns_match_case_insensitively(text in "[a-zA-Z0-9]{0,12}") {
        prop_assert!(wildcard_match(&text, &text.to_uppercase()));
        prop_assert!(wildcard_match("*", &text));
        let longer = format!("{text}x");
        prop_assert!(!wildcard_match(&text, &longer));
    }
}
