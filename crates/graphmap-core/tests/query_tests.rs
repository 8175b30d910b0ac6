//! # Query Scenario Tests
//!
//! End-to-end command execution against a small social graph:
//!
//! ```text
//! node1 (marko) --knows--> node2 (vadas)
//! node1 (marko) --knows--> node3 (lop)
//! node6 (peter) --created--> node3 (lop)
//! node4 (josh)  --created--> node5 (ripple)
//! node4 (josh)  --created--> node3 (lop)
//! node7 (ann) has no edges
//! ```

use graphmap_core::{
    CommandKind, GraphEdge, GraphError, GraphMap, GraphNode, QueryResult, ResultSet,
};
use std::collections::BTreeSet;

fn fixture() -> GraphMap {
    let map = GraphMap::new();
    map.execute(
        "upsert node key=node1, tags='name=marko,age=29';
         upsert node key=node2, tags='name=vadas,age=27';
         upsert node key=node3, tags='name=lop,lang=java';
         upsert node key=node4, tags='name=josh,age=32';
         upsert node key=node5, tags='name=ripple,lang=java';
         upsert node key=node6, tags='name=peter,age=35';
         upsert node key=node7, tags='name=ann,age=41';
         add edge fromKey=node1, toKey=node2, edgeType=knows, tags='knows,level=1';
         add edge fromKey=node1, toKey=node3, edgeType=knows, tags='knows,level=1';
         add edge fromKey=node6, toKey=node3, edgeType=created;
         add edge fromKey=node4, toKey=node5, edgeType=created;
         add edge fromKey=node4, toKey=node3, edgeType=created;",
    )
    .expect("fixture");
    map
}

fn query(map: &GraphMap, command: &str) -> QueryResult {
    map.query(command).expect("query")
}

fn link_set(result: &QueryResult) -> BTreeSet<(String, String)> {
    result
        .edges()
        .iter()
        .map(|e| (e.from_key().to_string(), e.to_key().to_string()))
        .collect()
}

fn node_keys(result: &QueryResult) -> Vec<String> {
    result.nodes().iter().map(|n| n.key().to_string()).collect()
}

fn knows_links() -> BTreeSet<(String, String)> {
    [("node1", "node2"), ("node1", "node3")]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

// =============================================================================
// EDGE SEARCH
// =============================================================================

mod edge_search {
    use super::*;

    #[test]
    fn by_edge_type() {
        let map = fixture();
        let result = query(&map, "select [knows];");
        assert_eq!(result.kind, CommandKind::Select);
        assert_eq!(result.edges().len(), 2);
        assert_eq!(link_set(&result), knows_links());
        assert!(result.aliases.is_empty());
    }

    #[test]
    fn tag_predicates_agree_with_edge_type() {
        let map = fixture();
        assert_eq!(link_set(&query(&map, "select [tags=knows];")), knows_links());
        assert_eq!(
            link_set(&query(&map, "select [tags='level=1'];")),
            knows_links()
        );
    }

    #[test]
    fn by_both_endpoints() {
        let map = fixture();
        let result = query(&map, "select [fromKey=node1;toKey=node2];");
        assert_eq!(result.edges().len(), 1);
        assert_eq!(result.edges()[0].edge_type(), "knows");
    }

    #[test]
    fn wildcards_and_alternatives() {
        let map = fixture();
        assert_eq!(query(&map, "select [cre*];").edges().len(), 3);
        assert_eq!(query(&map, "select [knows|created];").edges().len(), 5);
        assert_eq!(query(&map, "select [toKey=node?;fromKey=node4];").edges().len(), 2);
        assert!(query(&map, "select [likes];").items.is_empty());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let map = fixture();
        assert_eq!(link_set(&query(&map, "SELECT [KNOWS];")), knows_links());
        assert_eq!(query(&map, "select [fromKey=NODE1];").edges().len(), 2);
    }
}

// =============================================================================
// NODE SEARCH
// =============================================================================

mod node_search {
    use super::*;

    #[test]
    fn by_key_and_tags() {
        let map = fixture();
        assert_eq!(node_keys(&query(&map, "select (node4);")), vec!["node4"]);
        assert_eq!(
            node_keys(&query(&map, "select (tags=lang);")),
            vec!["node3", "node5"]
        );
        assert_eq!(
            node_keys(&query(&map, "select (lang=java;name=r*);")),
            vec!["node5"]
        );
        assert_eq!(query(&map, "select (*);").nodes().len(), 7);
    }
}

// =============================================================================
// CHAINED SELECT
// =============================================================================

mod chained_select {
    use super::*;

    #[test]
    fn friends_of_marko() {
        let map = fixture();
        let result = query(
            &map,
            "select (key=node1) as start -> [knows] as rel -> (*) as friends;",
        );
        // Endpoints of the knows edges, marko included
        assert_eq!(node_keys(&result), vec!["node1", "node2", "node3"]);
        assert_eq!(result.aliases.len(), 3);
        assert_eq!(result.alias("START").map(ResultSet::len), Some(1));
        assert_eq!(result.alias("rel").map(ResultSet::len), Some(2));
    }

    #[test]
    fn directed_friends_of_marko() {
        let map = fixture();
        let result = query(&map, "select (key=node1) ->> [knows] ->> (*) as friends;");
        assert_eq!(node_keys(&result), vec!["node2", "node3"]);
    }

    #[test]
    fn edge_to_node_yields_both_endpoints() {
        let map = fixture();
        let result = query(&map, "select [knows] -> (*);");
        assert_eq!(node_keys(&result), vec!["node1", "node2", "node3"]);
    }

    #[test]
    fn node_to_edge_matches_incoming_edges() {
        let map = fixture();
        let result = query(&map, "select (key=node3) -> [*];");
        assert_eq!(result.items.len(), 3);
        assert!(result.edges().iter().all(|e| e.to_key() == "node3"));
        assert!(query(&map, "select (key=node3) ->> [*];").items.is_empty());
    }

    #[test]
    fn edge_to_edge_shares_an_endpoint() {
        let map = fixture();
        let result = query(&map, "select [fromKey=node1;toKey=node2] -> [*];");
        assert_eq!(link_set(&result), knows_links());
    }

    #[test]
    fn creators_of_lop_in_table_order() {
        let map = fixture();
        let result = query(&map, "select (name=lop) <- [created] <- (*);");
        // node4 was inserted before node6
        assert_eq!(node_keys(&result), vec!["node4", "node6"]);
    }

    #[test]
    fn node_to_node_hop() {
        let map = fixture();
        let result = query(&map, "select (key=node4) -> (*);");
        assert_eq!(node_keys(&result), vec!["node3", "node5"]);
    }

    #[test]
    fn isolated_node_reaches_nothing() {
        let map = fixture();
        assert!(query(&map, "select (key=node7) -> [*];").items.is_empty());
        assert!(query(&map, "select (key=node7) <- (*);").items.is_empty());
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

mod mutations {
    use super::*;

    #[test]
    fn upsert_node_twice_keeps_one() {
        let map = fixture();
        map.execute("upsert node key=node1, tags='name=marko,age=30';")
            .expect("upsert");
        assert_eq!(map.node_count().expect("count"), 7);
        let node = map.get_node("node1").expect("get").expect("present");
        assert_eq!(node.tags().to_string(), "name=marko,age=30");
    }

    #[test]
    fn add_unique_edge_rejects_duplicate() {
        let map = fixture();
        let err = map
            .execute("add unique edge fromKey=node1, toKey=node2, edgeType=knows;")
            .expect_err("duplicate");
        assert!(matches!(err, GraphError::DuplicateEdge { .. }));
        assert_eq!(map.edge_count().expect("count"), 5);

        // Plain add duplicates the link
        map.execute("add edge fromKey=node1, toKey=node2, edgeType=knows;")
            .expect("add");
        assert_eq!(map.edge_count().expect("count"), 6);
    }

    #[test]
    fn self_loop_is_rejected_and_nothing_changes() {
        let map = fixture();
        let err = map
            .execute("upsert node key=node8; add edge fromKey=node1, toKey=node1;")
            .expect_err("self loop");
        assert!(matches!(err, GraphError::InvalidEdge(_)));
        // Parse failure: the first statement never ran
        assert_eq!(map.node_count().expect("count"), 7);
        assert_eq!(map.edge_count().expect("count"), 5);

        assert!(GraphEdge::new("node1", "node1").is_err());
    }

    #[test]
    fn delete_node_cascades() {
        let map = fixture();
        let result = query(&map, "delete (key=node3);");
        assert_eq!(result.kind, CommandKind::Delete);
        assert_eq!(result.affected, 1);
        assert_eq!(map.edge_count().expect("count"), 2);
        assert!(
            map.edges()
                .expect("edges")
                .iter()
                .all(|e| !e.touches("node3"))
        );
    }

    #[test]
    fn update_chain_result() {
        let map = fixture();
        let result = query(&map, "update (key=node1) -> [knows] set tags='level=2';");
        assert_eq!(result.affected, 2);
        assert!(query(&map, "select [tags='level=1'];").items.is_empty());
        assert_eq!(query(&map, "select [level=2];").edges().len(), 2);
    }

    #[test]
    fn entity_payload_roundtrips_through_commands() {
        let map = fixture();
        map.execute("upsert node key=account:user1, entity { 'aGVsbG8=' };")
            .expect("upsert");
        let node = map.get_node("ACCOUNT:USER1").expect("get").expect("present");
        assert_eq!(node.entity(), Some(&b"hello"[..]));
    }

    #[test]
    fn direct_api_matches_commands() {
        let map = fixture();
        map.add_node(GraphNode::new("node8").expect("node"))
            .expect("add");
        map.add_edge(
            GraphEdge::new("node8", "node1")
                .expect("edge")
                .with_edge_type("knows")
                .expect("type"),
        )
        .expect("add");
        assert_eq!(query(&map, "select [knows];").edges().len(), 3);
        assert_eq!(map.remove_node("node8").expect("remove"), Some(1));
    }
}

// =============================================================================
// ERRORS
// =============================================================================

mod errors {
    use super::*;

    #[test]
    fn parse_errors_execute_nothing() {
        let map = fixture();
        for bad in [
            "select [knows]",
            "select ();",
            "frobnicate (key=a);",
            "upsert node key=x, entity { '!!!' };",
            "select [tags='level=1];",
        ] {
            let err = map.execute(bad).expect_err(bad);
            assert!(matches!(err, GraphError::Parse { .. }), "{bad}: {err:?}");
        }
        assert_eq!(map.node_count().expect("count"), 7);
    }
}
