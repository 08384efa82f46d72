//! Micro benchmarks for the concurrent B-tree.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use cbtree::{BTree, BTreeOptions, BlockSpace, BlockStore, StoreOptions};
use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::ParallelIterator;

const INSERT_COUNT: u64 = 32_768;
const LOOKUP_SAMPLES: usize = 4_096;
const RANGE_WIDTH: u64 = 512;
const WRITER_THREADS: u64 = 4;

fn fresh_tree() -> Arc<BTree<u64, u64>> {
    let store: Arc<dyn BlockStore> =
        Arc::new(BlockSpace::in_memory(StoreOptions::default()).expect("store"));
    Arc::new(BTree::open(store, BTreeOptions::default()).expect("tree"))
}

fn loaded_tree(count: u64) -> Arc<BTree<u64, u64>> {
    let tree = fresh_tree();
    for key in 0..count {
        tree.put(key, key).expect("insert");
    }
    tree
}

fn micro_btree(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/btree");
    group.sample_size(30);

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("sequential_insert", |b| {
        b.iter_batched(
            fresh_tree,
            |tree| {
                for key in 0..INSERT_COUNT {
                    tree.put(key, key).expect("insert");
                }
                black_box(tree.height().expect("height"));
            },
            BatchSize::SmallInput,
        );
    });

    let mut random_keys: Vec<u64> = (0..INSERT_COUNT).collect();
    random_keys.shuffle(&mut ChaCha8Rng::seed_from_u64(0xBEEF_F00D));
    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("random_insert", |b| {
        b.iter_batched(
            fresh_tree,
            |tree| {
                for key in &random_keys {
                    tree.put(*key, *key).expect("insert");
                }
                black_box(tree.height().expect("height"));
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("parallel_insert", |b| {
        b.iter_batched(
            fresh_tree,
            |tree| {
                let handles: Vec<_> = (0..WRITER_THREADS)
                    .map(|thread_id| {
                        let tree = Arc::clone(&tree);
                        thread::spawn(move || {
                            for key in (thread_id..INSERT_COUNT).step_by(WRITER_THREADS as usize) {
                                tree.put(key, key).expect("insert");
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().expect("writer");
                }
                black_box(tree.height().expect("height"));
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("remove_random", |b| {
        b.iter_batched(
            || loaded_tree(INSERT_COUNT),
            |tree| {
                for key in &random_keys {
                    tree.remove(key).expect("remove");
                }
                black_box(tree.is_empty());
            },
            BatchSize::SmallInput,
        );
    });

    let tree = loaded_tree(INSERT_COUNT);
    let mut rng = ChaCha8Rng::seed_from_u64(0xFEED_FACE);
    group.throughput(Throughput::Elements(LOOKUP_SAMPLES as u64));
    group.bench_function(BenchmarkId::new("point_lookup", LOOKUP_SAMPLES), |b| {
        b.iter(|| {
            for _ in 0..LOOKUP_SAMPLES {
                let key = rng.gen_range(0..INSERT_COUNT);
                black_box(tree.get(&key).expect("get"));
            }
        });
    });

    group.throughput(Throughput::Elements(RANGE_WIDTH * 16));
    group.bench_function(BenchmarkId::new("range_scan", RANGE_WIDTH), |b| {
        b.iter(|| {
            for _ in 0..16 {
                let start = rng.gen_range(0..(INSERT_COUNT - RANGE_WIDTH));
                for item in tree.scan_between(start, start + RANGE_WIDTH) {
                    black_box(item.expect("scan"));
                }
            }
        });
    });

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("parallel_full_scan", |b| {
        b.iter(|| {
            let count = tree
                .scan_all()
                .par_iter()
                .filter(|item| item.is_ok())
                .count();
            black_box(count);
        });
    });

    group.finish();
}

criterion_group!(benches, micro_btree);
criterion_main!(benches);
