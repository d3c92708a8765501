// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Client Configuration

use std::path::PathBuf;

use crate::network::TransportConfig;
use crate::storage::StoreConfig;

/// Configuration for a [`Client`](super::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Database file. `None` keeps the store in memory.
    pub storage_path: Option<PathBuf>,
    /// Interval of the background one-time key check. Zero disables it.
    pub key_refresh_interval_ms: u64,
    /// Lifetime of transport authentication tokens, in seconds.
    pub auth_token_ttl_secs: i64,
    /// Lifetime of session-recovery tokens, in seconds.
    pub recovery_token_ttl_secs: i64,
    /// Transport settings. The device field is filled in from the client
    /// address.
    pub transport: TransportConfig,
    pub store: StoreConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            storage_path: None,
            key_refresh_interval_ms: 3_600_000,
            auth_token_ttl_secs: 300,
            recovery_token_ttl_secs: 300,
            transport: TransportConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the relay at `url`.
    pub fn new(url: &str) -> Self {
        let mut config = Self::default();
        config.transport.url = url.to_string();
        config
    }

    /// Stores sessions in the database at `path`.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }
}
