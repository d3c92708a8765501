// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common Test Utilities
//!
//! Shared fixtures for store, transport and client tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use envoy_core::crypto::SeedKeys;
use envoy_core::network::TransportConfig;
use envoy_core::pki::{DeviceAddress, MemoryKeyResolver};
use envoy_core::storage::{SessionStore, StoreConfig};

/// Installs a test log subscriber once. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn seed(byte: u8) -> [u8; 32] {
    [byte; 32]
}

pub fn alice() -> DeviceAddress {
    DeviceAddress::new("alice", "phone")
}

pub fn bob() -> DeviceAddress {
    DeviceAddress::new("bob", "laptop")
}

pub fn carol() -> DeviceAddress {
    DeviceAddress::new("carol", "tablet")
}

/// Small batches and near-zero backoff keep tests fast.
pub fn store_config() -> StoreConfig {
    StoreConfig {
        one_time_key_batch: 20,
        one_time_key_low_water: 5,
        publish_backoff_initial_ms: 1,
        publish_backoff_max_ms: 5,
        legacy_dir: None,
    }
}

/// In-memory store keyed from `seed`.
pub fn memory_store(resolver: &Arc<MemoryKeyResolver>, seed: &[u8; 32]) -> SessionStore {
    SessionStore::in_memory(SeedKeys::storage_key(seed), resolver.clone(), store_config())
        .expect("in-memory store")
}

/// Registers `address` with the directory and creates its account in a
/// fresh in-memory store.
pub fn device(resolver: &Arc<MemoryKeyResolver>, address: &DeviceAddress, seed: &[u8; 32]) -> SessionStore {
    resolver.register_seed(address, seed);
    let store = memory_store(resolver, seed);
    store.account_create(address, seed).expect("account");
    store
}

/// Transport settings with short timeouts for the in-memory relay.
pub fn transport_config(device: &str) -> TransportConfig {
    TransportConfig {
        handshake_timeout_ms: 1_000,
        poll_interval_ms: 10,
        ack_timeout_ms: 2_000,
        max_reconnect_attempts: 20,
        reconnect_delay_ms: 20,
        ..TransportConfig::new("memory://relay", device)
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
