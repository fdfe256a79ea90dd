//! Per-key engine against the global-lock baseline
//!
//! Run with: cargo bench --bench space_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use tspace::{GlobalLockSpace, LocalSpace, Space, SpaceConfig, Template};

type Engine = Arc<dyn Space<u64, u64>>;

fn config() -> SpaceConfig {
    SpaceConfig {
        sweeper: false,
        ..SpaceConfig::default()
    }
}

fn engines() -> Vec<(&'static str, Engine)> {
    let per_key: Engine = Arc::new(LocalSpace::new("bench-tspace", config()).unwrap());
    let global: Engine = Arc::new(GlobalLockSpace::new("bench-gspace", config()).unwrap());
    vec![("tspace", per_key), ("gspace", global)]
}

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");
    let count = 1_000u64;
    group.throughput(Throughput::Elements(count));

    for (label, space) in engines() {
        group.bench_function(BenchmarkId::new("out_then_in", label), |b| {
            b.iter(|| {
                for i in 0..count {
                    space.out(i % 16, black_box(i)).unwrap();
                }
                for i in 0..count {
                    black_box(space.in_(&(i % 16)).unwrap());
                }
            });
        });
        space.close().unwrap();
    }
    group.finish();
}

fn bench_template_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_scan");

    for (label, space) in engines() {
        for i in 0..256 {
            space.out(0, i).unwrap();
        }
        let last = Template::equals(0, 255);
        group.bench_function(BenchmarkId::new("rdp_match_tail", label), |b| {
            b.iter(|| black_box(space.rdp_match(&last).unwrap()));
        });
        space.close().unwrap();
    }
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    group.sample_size(20);
    let per_thread = 500u64;

    for threads in [2u64, 8] {
        group.throughput(Throughput::Elements(threads * per_thread));
        for (label, space) in engines() {
            group.bench_with_input(BenchmarkId::new(label, threads), &threads, |b, &threads| {
                b.iter(|| {
                    thread::scope(|scope| {
                        for key in 0..threads {
                            let space = &space;
                            scope.spawn(move || {
                                for i in 0..per_thread {
                                    space.out(key, i).unwrap();
                                }
                            });
                            scope.spawn(move || {
                                for _ in 0..per_thread {
                                    black_box(space.in_(&key).unwrap());
                                }
                            });
                        }
                    });
                });
            });
            space.close().unwrap();
        }
    }
    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_template_scan, bench_contended);
criterion_main!(benches);
