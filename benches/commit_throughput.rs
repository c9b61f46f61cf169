/**
 * Knowledge Store commit throughput benchmark
 *
 * DESIGN DECISION: benchmark `KnowledgeStore::propose`+`commit` in isolation
 * from the bus/evaluator pool, across an increasing number of distinct
 * field targets
 * WHY: §4.H names an aggregate throughput target (>= 10,000 msg/s) for the
 * bus as a whole; the store's single-writer commit path (§4.C) is the one
 * hop on the critical path that cannot be parallelized across a shared
 * target, so its per-commit cost bounds what the pipeline can ever sustain
 * regardless of how many workers it runs. Grounded on the teacher's
 * `benches/pattern_matching.rs` criterion harness shape.
 */

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use scb_core::domain::DomainId;
use scb_core::mutation::{Mutation, MutationTarget, MutationType};
use scb_core::store::KnowledgeStore;

fn bench_sequential_commits(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_throughput");
    for &count in &[10usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("sequential_add_insight", count), &count, |b, &count| {
            b.iter(|| {
                let store = KnowledgeStore::in_memory().unwrap();
                for i in 0..count {
                    let (version, _) = store.current();
                    let mutation = Mutation::new(
                        MutationType::AddInsight,
                        MutationTarget::Field {
                            domain: DomainId::PainPoints,
                            field: format!("insight_{i}"),
                        },
                        serde_json::json!(i),
                        0.9,
                        "bench",
                        version,
                    );
                    let token = store.propose(mutation).unwrap();
                    store.commit(token, 0.0).unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_context_hash(c: &mut Criterion) {
    c.bench_function("context_hash_bootstrap_tree", |b| {
        let tree = scb_core::domain::KnowledgeTree::bootstrap().unwrap();
        b.iter(|| tree.compute_context_hash().unwrap());
    });
}

criterion_group!(benches, bench_sequential_commits, bench_context_hash);
criterion_main!(benches);
