// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session Store
//!
//! Persists one ratchet account per local device and one ratchet session per
//! (local device, remote device) pair in SQLite, and exposes group
//! encryption and decryption over device addresses.
//!
//! Every read-modify-write runs under the store mutex inside a database
//! transaction, so a crash can never leave ratchet state out of step with
//! what was sent or acknowledged.

mod accounts;
mod error;
mod legacy;
pub mod migration;
mod sessions;

pub use error::StoreError;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::crypto::SymmetricKey;
use crate::engine::{Account, Session};
use crate::pki::KeyResolver;

/// Session store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// One-time keys generated per batch.
    pub one_time_key_batch: usize,
    /// Replenish when fewer keys than this remain.
    pub one_time_key_low_water: usize,
    /// First delay between key publication attempts.
    pub publish_backoff_initial_ms: u64,
    /// Upper bound of the publication delay.
    pub publish_backoff_max_ms: u64,
    /// Directory of the legacy file-per-pickle layout, imported on open.
    pub legacy_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            one_time_key_batch: 100,
            one_time_key_low_water: 10,
            publish_backoff_initial_ms: 100,
            publish_backoff_max_ms: 10_000,
            legacy_dir: None,
        }
    }
}

/// SQLite-backed store of ratchet accounts and sessions.
pub struct SessionStore {
    conn: Mutex<Connection>,
    /// Serializes preparing, publishing and marking one-time keys.
    publish_lock: Mutex<()>,
    pickle_key: SymmetricKey,
    resolver: Arc<dyn KeyResolver>,
    config: StoreConfig,
}

impl SessionStore {
    /// Opens or creates a store at the given path, applies migrations and
    /// imports a legacy layout if one is present.
    pub fn open<P: AsRef<Path>>(
        path: P,
        pickle_key: SymmetricKey,
        resolver: Arc<dyn KeyResolver>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?, pickle_key, resolver, config)
    }

    /// Creates an in-memory store (for testing).
    pub fn in_memory(
        pickle_key: SymmetricKey,
        resolver: Arc<dyn KeyResolver>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, pickle_key, resolver, config)
    }

    fn init(
        mut conn: Connection,
        pickle_key: SymmetricKey,
        resolver: Arc<dyn KeyResolver>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        migration::MigrationRunner::run(&mut conn, &migration::all_migrations())?;
        let store = SessionStore {
            conn: Mutex::new(conn),
            publish_lock: Mutex::new(()),
            pickle_key,
            resolver,
            config,
        };
        if let Some(dir) = store.config.legacy_dir.clone() {
            store.import_legacy(&dir)?;
        }
        Ok(store)
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StoreError> {
        migration::MigrationRunner::current_version(&self.conn.lock())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // === Row helpers shared by the operation modules ===

    fn load_account(&self, conn: &Connection, id: &str) -> Result<Account, StoreError> {
        let pickle: Vec<u8> = conn
            .query_row(
                "SELECT olm_account FROM accounts WHERE as_identifier = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))?;
        Ok(Account::from_pickle(&self.pickle_key, &pickle)?)
    }

    fn save_account(&self, conn: &Connection, id: &str, account: &Account) -> Result<(), StoreError> {
        conn.execute(
            "UPDATE accounts SET olm_account = ?2 WHERE as_identifier = ?1",
            params![id, account.pickle(&self.pickle_key)?],
        )?;
        Ok(())
    }

    fn load_session(&self, conn: &Connection, local: &str, remote: &str) -> Result<Option<Session>, StoreError> {
        let pickle: Option<Vec<u8>> = conn
            .query_row(
                "SELECT olm_session FROM sessions WHERE as_identifier = ?1 AND with_identifier = ?2",
                params![local, remote],
                |row| row.get(0),
            )
            .optional()?;
        match pickle {
            Some(pickle) => Ok(Some(Session::from_pickle(&self.pickle_key, &pickle)?)),
            None => Ok(None),
        }
    }

    fn save_session(&self, conn: &Connection, local: &str, remote: &str, session: &Session) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO sessions (as_identifier, with_identifier, olm_session)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (as_identifier, with_identifier)
             DO UPDATE SET olm_session = excluded.olm_session",
            params![local, remote, session.pickle(&self.pickle_key)?],
        )?;
        Ok(())
    }

    fn delete_session(conn: &Connection, local: &str, remote: &str) -> Result<bool, StoreError> {
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE as_identifier = ?1 AND with_identifier = ?2",
            params![local, remote],
        )?;
        Ok(deleted > 0)
    }
}
