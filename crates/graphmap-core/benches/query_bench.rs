//! # Query Benchmarks
//!
//! Performance benchmarks for graphmap-core command execution.
//!
//! Run with: `cargo bench -p graphmap-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use graphmap_core::{GraphEdge, GraphMap, GraphNode, Tags, parse};
use std::hint::black_box;

/// A chain `n0 -> n1 -> ... -> n{size-1}` with alternating edge types.
fn create_chain_map(size: usize) -> GraphMap {
    let map = GraphMap::new();
    for i in 0..size {
        let tags = Tags::parse(&format!("name=n{i},group={}", i % 10));
        map.add_node(GraphNode::new(format!("n{i}")).expect("node").with_tags(tags))
            .expect("add");
        if i > 0 {
            let edge_type = if i % 2 == 0 { "knows" } else { "created" };
            let edge = GraphEdge::new(format!("n{}", i - 1), format!("n{i}"))
                .expect("edge")
                .with_edge_type(edge_type)
                .expect("type");
            map.add_edge(edge).expect("add edge");
        }
    }
    map
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_parse(c: &mut Criterion) {
    let command = "select (name=n1*;group=3) as start -> [knows|created] as rel -> (*) as next;
                   update (key=n1) -> [knows] set tags='level=2';
                   add unique edge fromKey=n1, toKey=n9, edgeType=likes, tags='since=2020';";
    c.bench_function("parse_script", |b| {
        b.iter(|| black_box(parse(black_box(command))));
    });
}

fn bench_upsert_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert_nodes");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let map = GraphMap::new();
                for i in 0..size {
                    let _ = map.execute(&format!("upsert node key=n{i}, tags='group={}';", i % 10));
                }
                black_box(map)
            });
        });
    }

    group.finish();
}

fn bench_edge_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("edge_search");

    for size in [100, 1000, 10000].iter() {
        let map = create_chain_map(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(map.query("select [knows];")));
        });
    }

    group.finish();
}

fn bench_chained_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("chained_select");

    for size in [100, 1000, 10000].iter() {
        let map = create_chain_map(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(map.query("select (group=3) -> [*] -> (*) -> [knows] -> (*);")));
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000].iter() {
        let map = create_chain_map(*size);
        let bytes = map.to_bytes().expect("encode");

        group.bench_with_input(BenchmarkId::new("to_bytes", size), size, |b, _| {
            b.iter(|| black_box(map.to_bytes()));
        });
        group.bench_with_input(BenchmarkId::new("from_bytes", size), &bytes, |b, bytes| {
            b.iter(|| black_box(GraphMap::from_bytes(bytes)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_upsert_nodes,
    bench_edge_search,
    bench_chained_select,
    bench_snapshot,
);

criterion_main!(benches);
