// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Messaging Client Tests
//!
//! End-to-end runs of clients over the in-memory relay and directory.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::time::Duration;

use common::{alice, bob, seed, store_config, transport_config, wait_until};
use envoy_core::api::{Client, ClientBuilder, ClientConfig, ClientError, Content, Message, WILDCARD};
use envoy_core::network::MemoryRelay;
use envoy_core::pki::{DeviceAddress, MemoryKeyResolver};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

fn config(path: Option<&Path>) -> ClientConfig {
    ClientConfig {
        storage_path: path.map(Path::to_path_buf),
        key_refresh_interval_ms: 50,
        transport: transport_config(""),
        store: store_config(),
        ..ClientConfig::default()
    }
}

fn client(
    relay: &MemoryRelay,
    resolver: &Arc<MemoryKeyResolver>,
    address: DeviceAddress,
    seed_byte: u8,
    path: Option<&Path>,
) -> Client {
    common::init_tracing();
    resolver.register_seed(&address, &seed(seed_byte));
    ClientBuilder::new(address, seed(seed_byte))
        .resolver(resolver.clone())
        .dialer(Arc::new(relay.clone()))
        .config(config(path))
        .build()
        .unwrap()
}

fn collect(client: &Client, typ: &str) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    client.subscribe(typ, move |message| {
        let _ = tx.lock().send(message);
    });
    rx
}

#[test]
fn test_send_reaches_subscriber() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let alice_client = client(&relay, &resolver, alice(), 1, None);
    let bob_client = client(&relay, &resolver, bob(), 2, None);
    let inbox = collect(&bob_client, "chat.message");

    alice_client
        .send(&[bob()], &Content::new("chat.message", json!({"text": "hello"})))
        .unwrap();

    let message = inbox.recv_timeout(WAIT).unwrap();
    assert_eq!(message.sender, alice());
    assert_eq!(message.typ, "chat.message");
    assert_eq!(message.body, json!({"text": "hello"}));
    assert_eq!(message.offset, 1);
    assert_eq!(bob_client.store().account_offset(&bob()).unwrap(), 1);
}

#[test]
fn test_wildcard_catches_unmatched_types() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let alice_client = client(&relay, &resolver, alice(), 1, None);
    let bob_client = client(&relay, &resolver, bob(), 2, None);
    let chat = collect(&bob_client, "chat.message");
    let other = collect(&bob_client, WILDCARD);

    alice_client
        .send(&[bob()], &Content::new("fact.request", json!(null)))
        .unwrap();

    assert_eq!(other.recv_timeout(WAIT).unwrap().typ, "fact.request");
    assert!(chat.try_recv().is_err());
}

#[test]
fn test_request_gets_correlated_response() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let alice_client = client(&relay, &resolver, alice(), 1, None);
    let bob_client = Arc::new(client(&relay, &resolver, bob(), 2, None));

    let responder: Weak<Client> = Arc::downgrade(&bob_client);
    bob_client.subscribe("echo", move |message| {
        let Some(bob_client) = responder.upgrade() else {
            return;
        };
        let mut reply = Content::new("echo.reply", message.body.clone());
        reply.cid = message.cid.clone();
        bob_client.send(&[message.sender.clone()], &reply).unwrap();
    });

    let response = alice_client
        .request(&[bob()], Content::new("echo", json!({"n": 7})), WAIT)
        .unwrap();
    assert_eq!(response.sender, bob());
    assert_eq!(response.typ, "echo.reply");
    assert_eq!(response.body, json!({"n": 7}));
    assert!(response.cid.is_some());
}

#[test]
fn test_request_times_out() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let alice_client = client(&relay, &resolver, alice(), 1, None);
    let _bob_client = client(&relay, &resolver, bob(), 2, None);

    let result = alice_client.request(
        &[bob()],
        Content::new("echo", json!(null)).with_cid("c-1"),
        Duration::from_millis(200),
    );
    assert!(matches!(result, Err(ClientError::RequestTimeout)));

    // The conversation id is free again
    let result = alice_client.request(
        &[bob()],
        Content::new("echo", json!(null)).with_cid("c-1"),
        Duration::from_millis(50),
    );
    assert!(matches!(result, Err(ClientError::RequestTimeout)));
}

#[test]
fn test_session_recovery_renegotiates() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let alice_client = client(&relay, &resolver, alice(), 1, None);
    let bob_client = client(&relay, &resolver, bob(), 2, None);
    let alice_inbox = collect(&alice_client, "chat.message");
    let bob_inbox = collect(&bob_client, "chat.message");
    let chat = |text: &str| Content::new("chat.message", json!({ "text": text }));

    alice_client.send(&[bob()], &chat("one")).unwrap();
    bob_inbox.recv_timeout(WAIT).unwrap();
    bob_client.send(&[alice()], &chat("two")).unwrap();
    alice_inbox.recv_timeout(WAIT).unwrap();

    // Bob loses his session; alice's next message cannot be decrypted
    assert!(bob_client.store().purge_session(&bob(), &alice()).unwrap());
    alice_client.send(&[bob()], &chat("three")).unwrap();

    assert!(wait_until(WAIT, || !alice_client
        .store()
        .has_session(&alice(), &bob())
        .unwrap()));
    assert!(wait_until(WAIT, || bob_client.store().account_offset(&bob()).unwrap() == 2));

    alice_client.send(&[bob()], &chat("four")).unwrap();
    let message = bob_inbox.recv_timeout(WAIT).unwrap();
    assert_eq!(message.body, json!({"text": "four"}));
    assert_eq!(message.offset, 3);
}

#[test]
fn test_wiped_device_gets_peer_messages_again() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let bob_client = client(&relay, &resolver, bob(), 2, None);
    let bob_inbox = collect(&bob_client, "chat.message");
    let chat = |text: &str| Content::new("chat.message", json!({ "text": text }));

    {
        let alice_client = client(&relay, &resolver, alice(), 1, None);
        let alice_inbox = collect(&alice_client, "chat.message");
        alice_client.send(&[bob()], &chat("one")).unwrap();
        bob_inbox.recv_timeout(WAIT).unwrap();
        bob_client.send(&[alice()], &chat("two")).unwrap();
        alice_inbox.recv_timeout(WAIT).unwrap();
    }

    // Same seed, empty storage: the replayed "two" cannot be decrypted and
    // alice asks bob to start over
    let alice_client = client(&relay, &resolver, alice(), 1, None);
    let alice_inbox = collect(&alice_client, "chat.message");
    assert!(wait_until(WAIT, || !bob_client
        .store()
        .has_session(&bob(), &alice())
        .unwrap()));
    assert!(wait_until(WAIT, || alice_client.store().account_offset(&alice()).unwrap() == 1));

    bob_client.send(&[alice()], &chat("three")).unwrap();
    let message = alice_inbox.recv_timeout(WAIT).unwrap();
    assert_eq!(message.sender, bob());
    assert_eq!(message.body, json!({"text": "three"}));
    assert_eq!(message.offset, 2);
}

#[test]
fn test_restart_resumes_after_last_processed_frame() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bob.db");
    let alice_client = client(&relay, &resolver, alice(), 1, None);

    client(&relay, &resolver, bob(), 2, Some(&path)).close();
    for text in ["a", "b"] {
        alice_client
            .send(&[bob()], &Content::new("chat.message", json!(text)))
            .unwrap();
    }

    {
        let bob_client = client(&relay, &resolver, bob(), 2, Some(&path));
        assert!(wait_until(WAIT, || bob_client.store().account_offset(&bob()).unwrap() == 2));
    }

    let bob_client = client(&relay, &resolver, bob(), 2, Some(&path));
    let inbox = collect(&bob_client, "chat.message");
    assert_eq!(relay.auth_offsets("bob:laptop"), vec![0, 0, 2]);
    assert!(inbox.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_hooks_and_close() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    resolver.register_seed(&alice(), &seed(1));
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));

    let alice_client = {
        let connects = connects.clone();
        let disconnects = disconnects.clone();
        ClientBuilder::new(alice(), seed(1))
            .resolver(resolver.clone())
            .dialer(Arc::new(relay.clone()))
            .config(config(None))
            .on_connect(move || {
                connects.fetch_add(1, Ordering::SeqCst);
            })
            .on_disconnect(move |_| {
                disconnects.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap()
    };
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert!(alice_client.is_connected());

    relay.disconnect_all();
    assert!(wait_until(WAIT, || connects.load(Ordering::SeqCst) == 2));
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    alice_client.close();
    alice_client.close();
    assert!(matches!(
        alice_client.send(&[bob()], &Content::new("chat.message", json!(null))),
        Err(ClientError::Closed)
    ));
}

#[test]
fn test_builder_requires_resolver() {
    let result = ClientBuilder::new(alice(), seed(1))
        .dialer(Arc::new(MemoryRelay::new()))
        .config(config(None))
        .build();
    assert!(matches!(result, Err(ClientError::Configuration(_))));
}

#[test]
fn test_key_refresh_restocks_directory() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let _alice_client = client(&relay, &resolver, alice(), 1, None);

    resolver.clear_device_keys(&alice());
    assert!(wait_until(WAIT, || {
        use envoy_core::pki::KeyResolver;
        !resolver.list_device_keys(&alice()).unwrap().is_empty()
    }));
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let relay = MemoryRelay::new();
    let resolver = Arc::new(MemoryKeyResolver::new());
    let alice_client = client(&relay, &resolver, alice(), 1, None);
    let bob_client = client(&relay, &resolver, bob(), 2, None);
    let inbox = collect(&bob_client, "chat.message");
    let chat = |text: &str| Content::new("chat.message", json!({ "text": text }));

    alice_client.send(&[bob()], &chat("first")).unwrap();
    inbox.recv_timeout(WAIT).unwrap();

    assert!(bob_client.unsubscribe("chat.message"));
    assert!(!bob_client.unsubscribe("chat.message"));

    // Unhandled messages are still consumed and move the offset
    alice_client.send(&[bob()], &chat("second")).unwrap();
    assert!(wait_until(WAIT, || bob_client.store().account_offset(&bob()).unwrap() == 2));
    assert!(inbox.try_recv().is_err());
}
