#![forbid(unsafe_code)]
#![allow(clippy::cast_possible_wrap)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use lsc_cache::LinearCache;
use lsc_types::LogicalClock;
use std::sync::Arc;

const PAGE: usize = 4096;

fn make_cache(pages: u64) -> LinearCache {
    LinearCache::with_known_size(pages * PAGE as u64, Arc::new(LogicalClock::new()))
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_get_part_hit(c: &mut Criterion) {
    let cache = make_cache(64);
    cache.add_data(vec![0xA5; 64 * PAGE], 0).expect("warmup");

    c.bench_function("linear_cache_get_part_hit_4k", |b| {
        b.iter(|| {
            let _part = cache
                .get_part(black_box(8 * PAGE as i64), black_box(PAGE as u64))
                .expect("hit");
        });
    });
}

fn bench_fragmented_get(c: &mut Criterion) {
    // Every other page cached: 128 alternating blocks to walk.
    let cache = make_cache(256);
    for page in (0..256_u64).step_by(2) {
        cache
            .add_data(vec![1; PAGE], page * PAGE as u64)
            .expect("warmup");
    }

    c.bench_function("linear_cache_get_fragmented_1m", |b| {
        b.iter(|| {
            let _parts = cache
                .get(black_box(0), black_box(256 * PAGE as u64))
                .expect("get");
        });
    });
}

fn bench_add_then_invalidate(c: &mut Criterion) {
    let cache = make_cache(256);
    let mut page = 0_u64;

    c.bench_function("linear_cache_add_del_4k", |b| {
        b.iter(|| {
            let offset = (page % 256) * PAGE as u64;
            cache.add_data(vec![7; PAGE], offset).expect("add");
            cache.del_range(offset as i64, PAGE as u64).expect("del");
            page += 1;
        });
    });
}

criterion_group!(
    linear_cache_benches,
    bench_get_part_hit,
    bench_fragmented_get,
    bench_add_then_invalidate,
);
criterion_main!(linear_cache_benches);
