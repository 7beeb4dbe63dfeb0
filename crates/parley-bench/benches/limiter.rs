//! Rate limiter benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parley_core::{Outcome, RateLimitRule, RateLimiterChain, RequestContext};
use std::time::Duration;

const WINDOW: Duration = Duration::from_secs(15 * 60);

fn login_chain() -> RateLimiterChain {
    RateLimiterChain::login(
        RateLimitRule::per_ip(WINDOW, u32::MAX),
        RateLimitRule::failed_attempts_per_account(WINDOW, u32::MAX),
    )
}

/// Evaluate and record against a spread of keys.
fn bench_chain_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_evaluate");
    group.throughput(Throughput::Elements(1));

    for keys in [1usize, 1000] {
        let chain = login_chain();
        let contexts: Vec<_> = (0..keys)
            .map(|i| {
                RequestContext::new(format!("10.{}.{}.{}", i / 65536 % 256, i / 256 % 256, i % 256))
                    .with_account(Some(format!("user{i}@example.com")))
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("failure", keys), &contexts, |b, contexts| {
            let mut i = 0;
            b.iter(|| {
                let ctx = &contexts[i % contexts.len()];
                i += 1;
                if let Ok(permit) = chain.evaluate(black_box(ctx)) {
                    permit.record(Outcome::Failure);
                }
            });
        });
    }

    group.finish();
}

/// Key derivation, including IPv6 prefix masking.
fn bench_key_for(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_for");
    let chain = login_chain();
    let stage = &chain.stages()[0];

    let v4 = RequestContext::new("203.0.113.7");
    let v6 = RequestContext::new("2001:db8:abcd:12ff::1");

    group.bench_function("ipv4", |b| b.iter(|| stage.key_for(black_box(&v4))));
    group.bench_function("ipv6", |b| b.iter(|| stage.key_for(black_box(&v6))));

    group.finish();
}

/// Concurrent evaluation from several threads on one hot key.
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_contended");
    let chain = login_chain();
    let ctx = RequestContext::new("198.51.100.1").with_account(Some("bob@example.com"));

    group.bench_function("4_threads", |b| {
        b.iter_custom(|iters| {
            let start = std::time::Instant::now();
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        for _ in 0..iters {
                            if let Ok(permit) = chain.evaluate(&ctx) {
                                permit.record(Outcome::Success);
                            }
                        }
                    });
                }
            });
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_chain_evaluate, bench_key_for, bench_contended);
criterion_main!(benches);
