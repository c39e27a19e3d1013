//! Throughput Benchmark for shardkv
//!
//! This benchmark measures the sharded map and the RESP parser under
//! various workloads.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use shardkv::protocol::{parse_bytes, RespValue};
use shardkv::storage::{ShardedMap, Value};
use std::sync::Arc;
use std::time::Duration;

fn populated(n: usize) -> Arc<ShardedMap<Value>> {
    let map = Arc::new(ShardedMap::new(1024).unwrap());
    for i in 0..n {
        map.put(format!("key:{}", i), Value::string(format!("value:{}", i)));
    }
    map
}

/// Benchmark put operations
fn bench_put(c: &mut Criterion) {
    let map: Arc<ShardedMap<Value>> = Arc::new(ShardedMap::new(1024).unwrap());

    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_small", |b| {
        let mut i = 0u64;
        let value = Value::from("small_value");
        b.iter(|| {
            map.put(format!("key:{}", i), value.clone());
            i += 1;
        });
    });

    group.bench_function("put_medium", |b| {
        let mut i = 0u64;
        let value = Value::string("x".repeat(1024)); // 1KB value
        b.iter(|| {
            map.put(format!("key:{}", i), value.clone());
            i += 1;
        });
    });

    group.bench_function("put_if_absent_existing", |b| {
        let mut i = 0u64;
        let value = Value::from("v");
        b.iter(|| {
            black_box(map.put_if_absent(format!("key:{}", i % 1000), value.clone()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark get operations
fn bench_get(c: &mut Criterion) {
    let map = populated(100_000);

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(map.get_with(&key, |v| v.kind()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(map.get(&key));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let map = populated(10_000);

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                // 20% writes
                map.put(format!("new:{}", i), Value::from("value"));
            } else {
                // 80% reads
                let key = format!("key:{}", i % 10_000);
                black_box(map.contains_key(&key));
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let map: Arc<ShardedMap<Value>> = Arc::new(ShardedMap::new(1024).unwrap());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let map = Arc::clone(&map);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = format!("key:{}:{}", t, i);
                            map.put(key.clone(), Value::from("value"));
                            map.contains_key(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(map.len());
        });
    });

    group.bench_function("4_threads_locked_pairs", |b| {
        b.iter(|| {
            let map: Arc<ShardedMap<Value>> = Arc::new(ShardedMap::new(64).unwrap());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let map = Arc::clone(&map);
                    thread::spawn(move || {
                        for i in 0..2_000 {
                            let a = format!("a:{}", (t + i) % 100);
                            let b = format!("b:{}", i % 100);
                            let mut locked = map.lock_keys(&[&a, &b]);
                            locked.put_with_lock(a.as_str(), Value::from("1"));
                            locked.put_with_lock(b.as_str(), Value::from("2"));
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }
        });
    });

    group.finish();
}

/// Benchmark key traversal and sampling
fn bench_keys(c: &mut Criterion) {
    let map = populated(3_000);

    let mut group = c.benchmark_group("keys");

    group.bench_function("keys_all", |b| {
        b.iter(|| {
            black_box(map.keys());
        });
    });

    group.bench_function("random_distinct_100", |b| {
        b.iter(|| {
            black_box(map.random_distinct_keys(100));
        });
    });

    group.finish();
}

/// Benchmark RESP parsing
fn bench_parse(c: &mut Criterion) {
    let set = RespValue::array(vec![
        Bytes::from("SET"),
        Bytes::from("key:12345"),
        Bytes::from("x".repeat(64)),
    ])
    .serialize();

    let mut pipelined = Vec::new();
    for _ in 0..100 {
        pipelined.extend_from_slice(&set);
    }

    let mut group = c.benchmark_group("parse");

    group.throughput(Throughput::Bytes(set.len() as u64));
    group.bench_function("single_set", |b| {
        b.iter(|| black_box(parse_bytes(&set).unwrap()));
    });

    group.throughput(Throughput::Elements(100));
    group.bench_function("pipelined_100", |b| {
        b.iter(|| black_box(parse_bytes(&pipelined).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_get,
    bench_mixed,
    bench_concurrent,
    bench_keys,
    bench_parse,
);

criterion_main!(benches);
