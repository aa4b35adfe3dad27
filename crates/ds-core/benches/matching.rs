//! Whitelist matching benchmarks.
//!
//! Compares cached lookups against cold matching and raw whitelist parsing at
//! a few whitelist sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ds_core::clock::ManualClock;
use ds_core::domain::{parse_whitelist, DomainMatcher};

fn whitelist(entries: usize) -> String {
    (0..entries)
        .map(|i| format!("site{i}.example{}.com", i % 7))
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_is_whitelisted(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain/is_whitelisted");

    for entries in [1usize, 10, 100] {
        let raw = whitelist(entries);

        group.bench_with_input(BenchmarkId::new("cached", entries), &raw, |b, raw| {
            let mut matcher = DomainMatcher::with_clock(ManualClock::new(0));
            matcher.is_whitelisted("cdn.site3.example3.com", raw);
            b.iter(|| matcher.is_whitelisted(black_box("cdn.site3.example3.com"), black_box(raw)));
        });

        group.bench_with_input(BenchmarkId::new("cold", entries), &raw, |b, raw| {
            let mut matcher = DomainMatcher::with_clock(ManualClock::new(0));
            b.iter(|| {
                matcher.clear_caches();
                matcher.is_whitelisted(black_box("unrelated.host.org"), black_box(raw))
            });
        });
    }

    group.finish();
}

fn bench_parse_whitelist(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain/parse_whitelist");

    for entries in [10usize, 100, 500] {
        let raw = whitelist(entries);
        group.bench_with_input(BenchmarkId::from_parameter(entries), &raw, |b, raw| {
            b.iter(|| parse_whitelist(black_box(raw)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_is_whitelisted, bench_parse_whitelist);
criterion_main!(benches);
