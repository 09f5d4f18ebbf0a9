//! Detection latency over synthetic markets

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use searcher_core::{Mint, NATIVE_MINT};
use searcher_detector::fixtures::{fund, identity, MarketFixture};
use searcher_detector::{CrossPoolConfig, CrossPoolDetector, Detector, EvalContext};
use searcher_state::StateCache;

/// `count` pools on one pair with staggered prices
fn setup(count: u8) -> (StateCache, CrossPoolDetector) {
    let cache = StateCache::default();
    let token = Mint::repeat_byte(0x42);
    let markets = (0..count)
        .map(|i| {
            let pc = 1_000_000_000 + i as u64 * 7_000_000;
            let fixture = MarketFixture::constant_product(i, token, NATIVE_MINT, 1_000_000_000, pc);
            fixture.install(&cache, 1);
            fixture.market
        })
        .collect();

    let identity = identity(&[token, NATIVE_MINT]);
    fund(&cache, &identity, &[token, NATIVE_MINT], 1);
    let detector = CrossPoolDetector::new(
        CrossPoolConfig {
            markets,
            ..Default::default()
        },
        identity,
    );
    (cache, detector)
}

fn bench_cross_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_pool_evaluate");
    for count in [4u8, 16, 64] {
        let (cache, detector) = setup(count);
        let mut keys = cache.dependencies_of(&detector.watched_markets()).unwrap();
        keys.extend(detector.optional_accounts());
        let (view, _) = cache.snapshot_partial(&keys);

        group.bench_with_input(BenchmarkId::from_parameter(count), &view, |b, view| {
            b.iter(|| black_box(detector.evaluate(view, &EvalContext::unbounded())))
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let (cache, detector) = setup(64);
    let keys = cache.dependencies_of(&detector.watched_markets()).unwrap();

    c.bench_function("snapshot_64_pools", |b| {
        b.iter(|| black_box(cache.snapshot(&keys).unwrap()))
    });
}

criterion_group!(benches, bench_cross_pool, bench_snapshot);
criterion_main!(benches);
