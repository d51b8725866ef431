//! Micro-operation benchmarks for the sharded cache.
//!
//! Run with: `cargo bench --bench ops`
//!
//! Measures per-operation latency for routing, reads and writes under every
//! eviction policy, plus a multi-threaded mixed workload.

use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use shardcache::builder::{Cache, CacheBuilder};
use shardcache::ds::ShardSelector;
use shardcache::policy::EvictionPolicy;

const SHARDS: usize = 16;
const VALUE_SIZE: usize = 64;
const KEYS: usize = 4_096;
const OPS: u64 = 10_000;

fn keys() -> Vec<String> {
    (0..KEYS).map(|i| format!("bench/key/{i}")).collect()
}

fn cache(policy: EvictionPolicy, shard_size: usize) -> Cache<Vec<u8>> {
    CacheBuilder::new(SHARDS, shard_size)
        .weigher(|v: &Vec<u8>| v.len())
        .policy(policy)
        .build()
}

// ============================================================================
// Routing
// ============================================================================

fn bench_route(c: &mut Criterion) {
    let keys = keys();
    let selector = ShardSelector::new(SHARDS);
    let mut group = c.benchmark_group("route");
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("digest_and_jump", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(selector.route(black_box(key)));
            }
        })
    });
    group.finish();
}

// ============================================================================
// Get hit latency
// ============================================================================

fn bench_get_hit(c: &mut Criterion) {
    let keys = keys();
    let mut group = c.benchmark_group("get_hit");
    group.throughput(Throughput::Elements(OPS));

    for policy in EvictionPolicy::ALL {
        // Large enough that nothing is evicted.
        let cache = cache(policy, KEYS * VALUE_SIZE);
        for key in &keys {
            cache.set(key, vec![0; VALUE_SIZE]).unwrap();
        }
        let mut rng = SmallRng::seed_from_u64(42);
        group.bench_function(BenchmarkId::from_parameter(policy), |b| {
            b.iter(|| {
                for _ in 0..OPS {
                    let key = &keys[rng.gen_range(0..KEYS)];
                    black_box(cache.get(key).ok());
                }
            })
        });
    }
    group.finish();
}

// ============================================================================
// Set under eviction pressure
// ============================================================================

fn bench_set_evicting(c: &mut Criterion) {
    let keys = keys();
    let mut group = c.benchmark_group("set_evicting");
    group.throughput(Throughput::Elements(OPS));

    for policy in EvictionPolicy::ALL {
        // Room for a quarter of the key space.
        let cache = cache(policy, KEYS * VALUE_SIZE / SHARDS / 4);
        let mut rng = SmallRng::seed_from_u64(42);
        group.bench_function(BenchmarkId::from_parameter(policy), |b| {
            b.iter(|| {
                for _ in 0..OPS {
                    let key = &keys[rng.gen_range(0..KEYS)];
                    black_box(cache.set(key, vec![0; VALUE_SIZE]).ok());
                }
            })
        });
    }
    group.finish();
}

// ============================================================================
// Concurrent mixed workload
// ============================================================================

fn bench_concurrent_mixed(c: &mut Criterion) {
    let keys = Arc::new(keys());
    let threads = thread::available_parallelism().map_or(4, |n| n.get());
    let mut group = c.benchmark_group("concurrent_mixed");
    group.throughput(Throughput::Elements(OPS * threads as u64));

    group.bench_function(BenchmarkId::new("lru", threads), |b| {
        b.iter_custom(|iters| {
            let cache = cache(EvictionPolicy::Lru, KEYS * VALUE_SIZE / SHARDS / 2);
            let barrier = Arc::new(Barrier::new(threads + 1));
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let cache = cache.clone();
                    let keys = Arc::clone(&keys);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        let mut rng = SmallRng::seed_from_u64(42 + t as u64);
                        barrier.wait();
                        for _ in 0..iters {
                            for _ in 0..OPS {
                                let key = &keys[rng.gen_range(0..KEYS)];
                                if rng.gen_bool(0.8) {
                                    black_box(cache.get(key).ok());
                                } else {
                                    black_box(cache.set(key, vec![0; VALUE_SIZE]).ok());
                                }
                            }
                        }
                    })
                })
                .collect();

            barrier.wait();
            let start = Instant::now();
            for handle in handles {
                handle.join().unwrap();
            }
            start.elapsed()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_route,
    bench_get_hit,
    bench_set_evicting,
    bench_concurrent_mixed
);
criterion_main!(benches);
