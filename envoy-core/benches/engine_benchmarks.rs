// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Performance Benchmarks for the Engine, Store and Send Queue
//!
//! Run with: cargo bench -p envoy-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

// =============================================================================
// GROUP ENCRYPTION BENCHMARKS
// =============================================================================

fn bench_group_encrypt(c: &mut Criterion) {
    use envoy_core::engine::{Account, GroupSession, Session};

    let sender = Account::from_seed(&[1u8; 32]);
    let payload = vec![b'x'; 1024];

    let mut group = c.benchmark_group("group_encrypt");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    for recipients in [1usize, 4, 16] {
        let mut sessions: Vec<(String, Session)> = (0..recipients)
            .map(|i| {
                let mut peer = Account::from_seed(&[i as u8 + 2; 32]);
                peer.generate_one_time_keys(1);
                let session = sender.create_outbound_session(&peer.identity_key(), &peer.one_time_keys()[0]);
                (format!("peer{}:device", i), session)
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(recipients), &recipients, |b, _| {
            b.iter(|| {
                let mut group = GroupSession::new();
                for (address, session) in sessions.iter_mut() {
                    group.add_participant(address, session);
                }
                group.encrypt(black_box(&payload))
            })
        });
    }

    group.finish();
}

// =============================================================================
// SESSION STORE BENCHMARKS
// =============================================================================

fn bench_store_round_trip(c: &mut Criterion) {
    use envoy_core::crypto::SeedKeys;
    use envoy_core::pki::{DeviceAddress, MemoryKeyResolver};
    use envoy_core::storage::{SessionStore, StoreConfig};
    use std::sync::Arc;

    let resolver = Arc::new(MemoryKeyResolver::new());
    let open = |address: &DeviceAddress, seed: [u8; 32]| {
        resolver.register_seed(address, &seed);
        let store = SessionStore::in_memory(SeedKeys::storage_key(&seed), resolver.clone(), StoreConfig::default())
            .unwrap();
        store.account_create(address, &seed).unwrap();
        store
    };
    let alice = DeviceAddress::new("alice", "phone");
    let bob = DeviceAddress::new("bob", "laptop");
    let alice_store = open(&alice, [1u8; 32]);
    let bob_store = open(&bob, [2u8; 32]);

    let mut offset = 0u64;
    c.bench_function("store_encrypt_decrypt_1KB", |b| {
        let payload = vec![b'x'; 1024];
        b.iter(|| {
            let ciphertext = alice_store.encrypt(&alice, &[bob.clone()], &payload).unwrap();
            offset += 1;
            bob_store.decrypt(&alice, &bob, offset, black_box(&ciphertext)).unwrap()
        })
    });
}

// =============================================================================
// SEND QUEUE BENCHMARKS
// =============================================================================

fn bench_queue_throughput(c: &mut Criterion) {
    use envoy_core::network::PriorityQueue;

    let mut group = c.benchmark_group("priority_queue");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("push_pop_1000_mixed", |b| {
        let queue = PriorityQueue::new(3, 1_024);
        b.iter(|| {
            for i in 0..1_000usize {
                queue.push(i % 3, i).unwrap();
            }
            for _ in 0..1_000 {
                black_box(queue.pop());
            }
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_group_encrypt,
    bench_store_round_trip,
    bench_queue_throughput
);
criterion_main!(benches);
