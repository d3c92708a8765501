// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Account lifecycle, resumption offsets and one-time key publication.

use rusqlite::{params, OptionalExtension};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{SessionStore, StoreError};
use crate::engine::{Account, PreKey};
use crate::pki::DeviceAddress;

/// Attempts per publication outside of account creation.
const REPLENISH_PUBLISH_ATTEMPTS: u32 = 3;

/// How a publication treats keys already in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publication {
    /// Drop whatever the directory holds for the device. Keys left over from
    /// an earlier account under the same address would otherwise be handed
    /// to peers although no local secret matches them.
    Replace,
    Append,
}

impl SessionStore {
    // === Account Operations ===

    /// Creates the account of a local device from its seed.
    ///
    /// A second call for the same device is a no-op. A new account's initial
    /// one-time keys are published only after the account row is committed,
    /// retrying until the directory accepts them. They replace any keys the
    /// directory still lists for the device.
    pub fn account_create(&self, local: &DeviceAddress, seed: &[u8; 32]) -> Result<(), StoreError> {
        let id = local.to_string();
        let _publishing = self.publish_lock.lock();
        let keys = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM accounts WHERE as_identifier = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                debug!("Account {} already exists", id);
                return Ok(());
            }

            let mut account = Account::from_seed(seed);
            account.generate_one_time_keys(self.config.one_time_key_batch);
            tx.execute(
                "INSERT INTO accounts (as_identifier, \"offset\", olm_account) VALUES (?1, 0, ?2)",
                params![id, account.pickle(&self.pickle_key)?],
            )?;
            tx.commit()?;
            info!("Created account {}", id);
            account.one_time_keys()
        };

        self.publish_keys(local, keys, Publication::Replace, None)
    }

    /// Last committed resumption offset of a local device.
    pub fn account_offset(&self, local: &DeviceAddress) -> Result<u64, StoreError> {
        let id = local.to_string();
        let offset: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT \"offset\" FROM accounts WHERE as_identifier = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        offset
            .map(|o| o as u64)
            .ok_or(StoreError::AccountNotFound(id))
    }

    /// Moves the offset forward to `offset`; never moves it back.
    pub fn advance_offset(&self, local: &DeviceAddress, offset: u64) -> Result<(), StoreError> {
        let id = local.to_string();
        let updated = self.conn.lock().execute(
            "UPDATE accounts SET \"offset\" = MAX(\"offset\", ?2) WHERE as_identifier = ?1",
            params![id, to_sql_offset(offset)?],
        )?;
        if updated == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }

    /// Public identity key of a local device.
    pub fn identity_key(&self, local: &DeviceAddress) -> Result<[u8; 32], StoreError> {
        let conn = self.conn.lock();
        Ok(self.load_account(&conn, &local.to_string())?.identity_key())
    }

    // === One-Time Keys ===

    /// Checks how many pre-keys the directory still holds for this device
    /// and publishes a new batch when it runs low. Also retries keys whose
    /// earlier publication failed. Returns the number of keys published.
    pub fn refresh_one_time_keys(&self, local: &DeviceAddress) -> Result<usize, StoreError> {
        let _publishing = self.publish_lock.lock();
        let remaining = self.resolver.list_device_keys(local)?.len();
        let keys = self.prepare_keys(local, remaining < self.config.one_time_key_low_water)?;
        if keys.is_empty() {
            return Ok(0);
        }
        debug!("{} pre-keys left for {}, publishing {}", remaining, local, keys.len());
        let count = keys.len();
        self.publish_keys(local, keys, Publication::Append, Some(REPLENISH_PUBLISH_ATTEMPTS))?;
        Ok(count)
    }

    /// Tops up the local reserve after an inbound session consumed a key.
    pub(super) fn replenish_one_time_keys(&self, local: &DeviceAddress) {
        let _publishing = self.publish_lock.lock();
        let result = self
            .prepare_keys(local, false)
            .and_then(|keys| {
                if keys.is_empty() {
                    return Ok(());
                }
                self.publish_keys(local, keys, Publication::Append, Some(REPLENISH_PUBLISH_ATTEMPTS))
            });
        if let Err(e) = result {
            warn!("Failed to replenish one-time keys for {}: {}", local, e);
        }
    }

    /// Generates a batch if forced or below the low-water mark, and returns
    /// every key not yet published. Callers hold the publication lock.
    fn prepare_keys(&self, local: &DeviceAddress, force: bool) -> Result<Vec<PreKey>, StoreError> {
        let id = local.to_string();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut account = self.load_account(&tx, &id)?;

        if force || account.one_time_key_count() < self.config.one_time_key_low_water {
            account.generate_one_time_keys(self.config.one_time_key_batch);
            self.save_account(&tx, &id, &account)?;
            tx.commit()?;
        }
        Ok(account.one_time_keys())
    }

    /// Publishes `keys` with exponential backoff, then marks exactly those
    /// keys published. `None` retries until the directory accepts.
    fn publish_keys(
        &self,
        local: &DeviceAddress,
        keys: Vec<PreKey>,
        mode: Publication,
        max_attempts: Option<u32>,
    ) -> Result<(), StoreError> {
        let ids: Vec<u32> = keys.iter().map(|key| key.id).collect();
        let mut delay = self.config.publish_backoff_initial_ms;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let published = match mode {
                Publication::Replace => self.resolver.set_device_keys(local, keys.clone()),
                Publication::Append => self.resolver.add_device_keys(local, keys.clone()),
            };
            match published {
                Ok(()) => break,
                Err(e) if max_attempts.is_some_and(|max| attempt >= max) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        "Publishing one-time keys for {} failed (attempt {}): {}",
                        local, attempt, e
                    );
                    thread::sleep(Duration::from_millis(delay));
                    delay = (delay * 2).min(self.config.publish_backoff_max_ms);
                }
            }
        }

        let id = local.to_string();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut account = self.load_account(&tx, &id)?;
        account.mark_keys_as_published(&ids);
        self.save_account(&tx, &id, &account)?;
        tx.commit()?;
        info!("Published {} one-time keys for {}", ids.len(), local);
        Ok(())
    }
}

/// Offsets are stored as SQLite integers.
pub(super) fn to_sql_offset(offset: u64) -> Result<i64, StoreError> {
    i64::try_from(offset).map_err(|_| StoreError::OffsetOutOfRange(offset))
}
