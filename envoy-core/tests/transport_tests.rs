// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Resilient Transport Tests
//!
//! Runs the transport against the in-memory relay: acknowledgements,
//! resumption, reconnects, pings and shutdown.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use common::{transport_config, wait_until};
use envoy_core::network::{
    ConnectionState, MemoryRelay, NetworkError, StaticCredentials, Transport, TransportConfig,
    KIND_MESSAGE,
};

const ALICE: &str = "alice:phone";
const BOB: &str = "bob:laptop";

fn transport(relay: &MemoryRelay, config: TransportConfig, offset: u64) -> (Transport, Arc<StaticCredentials>) {
    common::init_tracing();
    let credentials = Arc::new(StaticCredentials::new("token", offset));
    let transport = Transport::new(config, Arc::new(relay.clone()), credentials.clone());
    (transport, credentials)
}

fn connected(relay: &MemoryRelay, device: &str) -> Transport {
    let (transport, _) = transport(relay, transport_config(device), 0);
    transport.connect().unwrap();
    transport
}

#[test]
fn test_send_is_acknowledged_and_delivered() {
    let relay = MemoryRelay::new();
    let alice = connected(&relay, ALICE);
    let bob = connected(&relay, BOB);
    assert!(alice.is_connected());

    alice.send(&[BOB.to_string()], KIND_MESSAGE, b"hello").unwrap();

    let inbound = bob.receive().unwrap();
    assert_eq!(inbound.sender, ALICE);
    assert_eq!(inbound.kind, KIND_MESSAGE);
    assert_eq!(inbound.offset, 1);
    assert_eq!(inbound.ciphertext, b"hello");
}

#[test]
fn test_send_to_several_recipients() {
    let relay = MemoryRelay::new();
    let alice = connected(&relay, ALICE);

    alice
        .send(&[BOB.to_string(), "carol:tablet".to_string()], KIND_MESSAGE, b"both")
        .unwrap();
    assert_eq!(relay.mailbox(BOB).len(), 1);
    assert_eq!(relay.mailbox("carol:tablet").len(), 1);
}

#[test]
fn test_send_async_reports_each_frame() {
    let relay = MemoryRelay::new();
    let alice = connected(&relay, ALICE);
    let (tx, rx) = mpsc::channel();

    alice
        .send_async(&[BOB.to_string(), "carol:tablet".to_string()], KIND_MESSAGE, b"x", move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

    for _ in 0..2 {
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Ok(()));
    }
}

#[test]
fn test_resumes_after_offset() {
    let relay = MemoryRelay::new();
    let alice = connected(&relay, ALICE);
    for i in 0..3u8 {
        alice.send(&[BOB.to_string()], KIND_MESSAGE, &[i]).unwrap();
    }

    let (bob, _) = transport(&relay, transport_config(BOB), 1);
    bob.connect().unwrap();

    assert_eq!(bob.receive().unwrap().offset, 2);
    assert_eq!(bob.receive().unwrap().offset, 3);
    assert_eq!(relay.auth_offsets(BOB), vec![1]);
}

#[test]
fn test_reconnect_fires_hooks_and_resumes_from_current_offset() {
    let relay = MemoryRelay::new();
    let (bob, credentials) = transport(&relay, transport_config(BOB), 0);
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let connects = connects.clone();
        bob.on_connect(move || {
            connects.fetch_add(1, Ordering::SeqCst);
        });
        let disconnects = disconnects.clone();
        bob.on_disconnect(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }
    bob.connect().unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    credentials.set_offset(5);
    relay.disconnect_all();

    assert!(wait_until(Duration::from_secs(5), || {
        disconnects.load(Ordering::SeqCst) == 1 && connects.load(Ordering::SeqCst) == 2
    }));
    assert!(wait_until(Duration::from_secs(2), || bob.is_connected()));
    assert_eq!(relay.auth_offsets(BOB), vec![0, 5]);

    // Still usable after the reconnect
    let alice = connected(&relay, ALICE);
    bob.send(&[ALICE.to_string()], KIND_MESSAGE, b"back").unwrap();
    assert_eq!(alice.receive().unwrap().ciphertext, b"back");
}

#[test]
fn test_answers_pings() {
    let relay = MemoryRelay::new();
    let _bob = connected(&relay, BOB);

    relay.ping(BOB);
    assert!(wait_until(Duration::from_secs(2), || relay.pong_count(BOB) == 1));
}

#[test]
fn test_rejected_authentication_is_permanent() {
    let relay = MemoryRelay::new();
    relay.set_reject_auth(true);
    let (bob, _) = transport(&relay, transport_config(BOB), 0);

    assert!(matches!(bob.connect(), Err(NetworkError::AuthenticationFailed(_))));
    assert_eq!(bob.state(), ConnectionState::Disconnected);
}

#[test]
fn test_unreachable_relay() {
    let relay = MemoryRelay::new();
    relay.set_refuse_dials(true);
    let (bob, _) = transport(&relay, transport_config(BOB), 0);

    assert!(matches!(bob.connect(), Err(NetworkError::ConnectionFailed(_))));
}

#[test]
fn test_gives_up_after_max_reconnects() {
    let relay = MemoryRelay::new();
    let config = TransportConfig {
        max_reconnect_attempts: 3,
        ..transport_config(BOB)
    };
    let (bob, _) = transport(&relay, config, 0);
    bob.connect().unwrap();

    relay.set_refuse_dials(true);
    relay.disconnect_all();
    assert!(wait_until(Duration::from_secs(5), || relay.dial_count() == 4
        && bob.state() == ConnectionState::Disconnected));

    assert_eq!(
        bob.send(&[ALICE.to_string()], KIND_MESSAGE, b"lost"),
        Err(NetworkError::MaxRetriesExceeded)
    );
}

#[test]
fn test_connect_after_giving_up_dials_again() {
    let relay = MemoryRelay::new();
    let config = TransportConfig {
        max_reconnect_attempts: 2,
        ..transport_config(BOB)
    };
    let (bob, _) = transport(&relay, config, 0);
    bob.connect().unwrap();

    relay.set_refuse_dials(true);
    relay.disconnect_all();
    assert!(wait_until(Duration::from_secs(5), || relay.dial_count() == 3
        && bob.state() == ConnectionState::Disconnected));
    assert_eq!(relay.connected_count(), 0);

    relay.set_refuse_dials(false);
    bob.connect().unwrap();
    assert!(bob.is_connected());
    assert_eq!(relay.dial_count(), 4);
    assert_eq!(relay.connected_count(), 1);

    let alice = connected(&relay, ALICE);
    bob.send(&[ALICE.to_string()], KIND_MESSAGE, b"again").unwrap();
    assert_eq!(alice.receive().unwrap().ciphertext, b"again");
    alice.send(&[BOB.to_string()], KIND_MESSAGE, b"welcome").unwrap();
    assert_eq!(bob.receive().unwrap().ciphertext, b"welcome");
}

#[test]
fn test_undecodable_frame_is_dropped() {
    let relay = MemoryRelay::new();
    let (bob, _) = transport(&relay, transport_config(BOB), 0);
    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let disconnects = disconnects.clone();
        bob.on_disconnect(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }
    bob.connect().unwrap();

    relay.send_raw(BOB, b"garbage");
    let alice = connected(&relay, ALICE);
    alice.send(&[BOB.to_string()], KIND_MESSAGE, b"after").unwrap();

    let inbound = bob.receive().unwrap();
    assert_eq!(inbound.ciphertext, b"after");
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    assert!(bob.is_connected());
    assert_eq!(relay.auth_offsets(BOB), vec![0]);
}

#[test]
fn test_close_is_idempotent_and_final() {
    let relay = MemoryRelay::new();
    let bob = connected(&relay, BOB);
    assert_eq!(relay.connected_count(), 1);

    bob.close();
    bob.close();

    assert_eq!(bob.state(), ConnectionState::Disconnected);
    assert_eq!(relay.connected_count(), 0);
    assert_eq!(bob.receive(), Err(NetworkError::Closed));
    assert_eq!(
        bob.send(&[ALICE.to_string()], KIND_MESSAGE, b"late"),
        Err(NetworkError::Closed)
    );
    assert_eq!(bob.connect(), Err(NetworkError::Closed));
}

#[test]
fn test_close_unblocks_receiver() {
    let relay = MemoryRelay::new();
    let bob = Arc::new(connected(&relay, BOB));

    let receiver = {
        let bob = bob.clone();
        std::thread::spawn(move || bob.receive())
    };
    std::thread::sleep(Duration::from_millis(50));
    bob.close();

    assert_eq!(receiver.join().unwrap(), Err(NetworkError::Closed));
}
