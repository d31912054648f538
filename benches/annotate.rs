//! Annotation and transform benchmarks.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench annotate
//! # With a custom filter:
//! cargo bench --bench annotate -- walker
//! ```
//!
//! HTML reports land in `target/criterion/`.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use bramble::annotate::{AnnotatedLine, AnnotationMerger, Annotator, MemoryStore};
use bramble::transform::{ApplyOptions, TreeTransform};
use bramble::tree::WorkingTree;
use bramble::{Line, TextKey};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn key(rev: usize) -> TextKey {
    TextKey::new("bench.txt", format!("r{rev}"))
}

/// A linear history of `depth` revisions of an `width`-line file. Each
/// revision rewrites one line.
fn linear_history(depth: usize, width: usize) -> MemoryStore {
    let mut store = MemoryStore::new();
    let mut lines: Vec<String> = (0..width).map(|i| format!("line {i}\n")).collect();
    for rev in 0..depth {
        if rev > 0 {
            lines[(rev * 7) % width] = format!("edit {rev}\n");
        }
        let parents = if rev == 0 { vec![] } else { vec![key(rev - 1)] };
        store.add_text(key(rev), parents, lines.concat().as_bytes());
    }
    store
}

/// Two branches of `depth` revisions each, merged at the tip.
fn merged_history(depth: usize, width: usize) -> (MemoryStore, TextKey) {
    let mut store = MemoryStore::new();
    let base: Vec<String> = (0..width).map(|i| format!("base {i}\n")).collect();
    let root = TextKey::new("bench.txt", "base");
    store.add_text(root.clone(), vec![], base.concat().as_bytes());
    let mut tips = Vec::new();
    for side in ["left", "right"] {
        let mut lines = base.clone();
        let mut parent = root.clone();
        for rev in 0..depth {
            lines[(rev * 13) % width] = format!("{side} {rev}\n");
            let k = TextKey::new("bench.txt", format!("{side}-{rev}"));
            store.add_text(k.clone(), vec![parent], lines.concat().as_bytes());
            parent = k;
        }
        tips.push((parent, lines));
    }
    let merged: String = tips[0].1.concat();
    let tip = TextKey::new("bench.txt", "merge");
    store.add_text(
        tip.clone(),
        tips.into_iter().map(|(k, _)| k).collect(),
        merged.as_bytes(),
    );
    (store, tip)
}

// ---------------------------------------------------------------------------
// Benchmark: walker
// ---------------------------------------------------------------------------

fn bench_walker_linear(c: &mut Criterion) {
    let mut group = c.benchmark_group("walker/linear");
    for &depth in &[10_usize, 100, 500] {
        let store = linear_history(depth, 200);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("revisions", depth), &depth, |b, &d| {
            b.iter(|| {
                let mut annotator = Annotator::new(&store);
                black_box(annotator.annotate_flat(&key(d - 1)).unwrap_or_default())
            });
        });
    }
    group.finish();
}

fn bench_walker_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("walker/merge");
    for &depth in &[10_usize, 100] {
        let (store, tip) = merged_history(depth, 300);
        group.bench_with_input(BenchmarkId::new("branch_depth", depth), &depth, |b, _| {
            b.iter(|| {
                let mut annotator = Annotator::new(&store);
                black_box(annotator.annotate_flat(&tip).unwrap_or_default())
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: merger (micro, no store)
// ---------------------------------------------------------------------------

fn bench_reannotate_two_parents(c: &mut Criterion) {
    let width = 2_000;
    let left: Vec<AnnotatedLine<u32>> = (0..width)
        .map(|i| AnnotatedLine::new(1, format!("l{i}\n").into_bytes()))
        .collect();
    let right: Vec<AnnotatedLine<u32>> = (0..width)
        .map(|i| {
            let text = if i % 10 == 0 { format!("r{i}\n") } else { format!("l{i}\n") };
            AnnotatedLine::new(2, text.into_bytes())
        })
        .collect();
    let new_lines: Vec<Line> = right.iter().map(|l| l.line.clone()).collect();
    let parents = vec![left, right];
    let merger = AnnotationMerger::new();

    c.bench_function("merger/two_parents_2000_lines", |b| {
        b.iter(|| black_box(merger.reannotate(&parents, &new_lines, &3, None)));
    });
}

// ---------------------------------------------------------------------------
// Benchmark: transform apply
// ---------------------------------------------------------------------------

fn bench_transform_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform/apply");
    for &n in &[10_usize, 100] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("new_files", n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let dir = tempfile::tempdir().expect("tempdir");
                    let tree = WorkingTree::init(dir.path()).expect("init tree");
                    (dir, tree)
                },
                |(_dir, mut tree)| {
                    let mut tt = TreeTransform::new(&mut tree).expect("transform");
                    let root = tt.root();
                    let sub = tt.new_directory("sub", root).expect("new dir");
                    for i in 0..n {
                        tt.new_file(&format!("f{i}"), sub, b"payload\n", None)
                            .expect("new file");
                    }
                    black_box(tt.apply(ApplyOptions::default()).expect("apply"))
                },
                criterion::BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_walker_linear,
    bench_walker_merge,
    bench_reannotate_two_parents,
    bench_transform_apply,
);
criterion_main!(benches);
