//! # Overlay Node Benchmarks
//!
//! Hot paths that run on every prune tick or every discovery round:
//!
//! | Path | Runs | Target |
//! |------|------|--------|
//! | Connection trimming | Every prune interval | < 1ms at 1000 peers |
//! | Namespace key derivation | Every advertise / find | < 1µs |
//! | Listen address derivation | Once per node | < 10µs |

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use libp2p::PeerId;
use overlay_p2p::{namespace_key, ConnectionManager, ConnectionPolicy, ListenAddressSet};
use rand::Rng;
use std::time::{Duration, Instant};

// ============================================================================
// Connection policy
// ============================================================================

fn populated_manager(peers: usize, grace: Duration) -> (ConnectionManager, Instant) {
    let policy = ConnectionPolicy::new(peers / 4, peers / 2, grace).expect("valid bounds");
    let mut manager = ConnectionManager::new(policy);
    let mut rng = rand::thread_rng();
    let now = Instant::now();

    for i in 0..peers {
        let peer = PeerId::random();
        manager.connected(peer, now);
        manager.set_score(&peer, rng.gen_range(-10.0..10.0));
        if i % 10 == 0 {
            manager.protect(peer);
        }
    }
    (manager, now)
}

fn bench_connection_trim(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection-policy");

    for peers in [100, 500, 1000] {
        group.bench_with_input(BenchmarkId::new("mark", peers), &peers, |b, &peers| {
            b.iter_batched(
                || populated_manager(peers, Duration::from_secs(60)),
                |(mut manager, now)| black_box(manager.trim(now)),
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("evict", peers), &peers, |b, &peers| {
            b.iter_batched(
                || {
                    let (mut manager, now) = populated_manager(peers, Duration::from_secs(1));
                    manager.trim(now);
                    (manager, now + Duration::from_secs(2))
                },
                |(mut manager, later)| black_box(manager.trim(later)),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// ============================================================================
// Discovery and addressing
// ============================================================================

fn bench_namespace_key(c: &mut Criterion) {
    c.bench_function("namespace_key", |b| {
        b.iter(|| black_box(namespace_key(black_box("overlay-news"))))
    });
}

fn bench_listen_addresses(c: &mut Criterion) {
    c.bench_function("listen_addresses_from_port", |b| {
        b.iter(|| black_box(ListenAddressSet::from_port(black_box(8001))))
    });
}

criterion_group!(
    benches,
    bench_connection_trim,
    bench_namespace_key,
    bench_listen_addresses
);
criterion_main!(benches);
