//! Routing benchmarks for parlor-core.
//!
//! Measures persist-then-push cost for broadcasts and direct messages with
//! a varying number of online connections.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parlor_core::{
    ConnectionHandle, Identity, InboundMessage, Mailbox, MemoryStore, PresenceRegistry, Router,
    RouterConfig,
};
use std::sync::Arc;

fn populated_router(online: usize) -> (Router, Vec<Mailbox>) {
    let presence = Arc::new(PresenceRegistry::new());
    let mut mailboxes = Vec::with_capacity(online);
    for i in 0..online {
        // Large queues so pushes never hit the full-queue path.
        let (handle, mailbox) = ConnectionHandle::channel(1 << 16);
        presence.bind(Identity::new(format!("user{i}")), handle);
        mailboxes.push(mailbox);
    }

    let router = Router::new(
        Arc::new(MemoryStore::new()),
        presence,
        RouterConfig::default(),
    );
    (router, mailboxes)
}

/// Benchmark broadcast fan-out.
fn bench_broadcast(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let sender = Identity::new("user0");

    let mut group = c.benchmark_group("broadcast");
    for online in [1, 10, 100, 1000] {
        let (router, mut mailboxes) = populated_router(online);
        group.throughput(Throughput::Elements(online as u64));
        group.bench_with_input(BenchmarkId::from_parameter(online), &online, |b, _| {
            b.iter(|| {
                rt.block_on(router.route(
                    Some(black_box(&sender)),
                    InboundMessage::broadcast("hello everyone"),
                ))
                .unwrap();
                for mailbox in &mut mailboxes {
                    while mailbox.try_recv().is_some() {}
                }
            })
        });
    }
    group.finish();
}

/// Benchmark direct delivery, which touches at most two connections.
fn bench_direct(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let sender = Identity::new("user0");
    let (router, mut mailboxes) = populated_router(1000);

    c.bench_function("direct_1000_online", |b| {
        b.iter(|| {
            rt.block_on(router.route(
                Some(black_box(&sender)),
                InboundMessage::direct("user1", "just for you"),
            ))
            .unwrap();
            for mailbox in mailboxes.iter_mut().take(2) {
                while mailbox.try_recv().is_some() {}
            }
        })
    });
}

/// Benchmark presence broadcast.
fn bench_presence(c: &mut Criterion) {
    let mut group = c.benchmark_group("presence_broadcast");
    for online in [10, 100, 1000] {
        let (router, mut mailboxes) = populated_router(online);
        group.bench_with_input(BenchmarkId::from_parameter(online), &online, |b, _| {
            b.iter(|| {
                black_box(router.broadcast_presence());
                for mailbox in &mut mailboxes {
                    while mailbox.try_recv().is_some() {}
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_direct, bench_presence);
criterion_main!(benches);
