// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Group encryption and decryption over stored sessions.

use rusqlite::params;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::{SessionStore, StoreError};
use crate::engine::{Account, GroupMessage, GroupSession, PreKeyMessage, Session};
use crate::pki::{DeviceAddress, PkiError};

impl SessionStore {
    // === Session Operations ===

    /// Encrypts `plaintext` once for all `recipients`.
    ///
    /// Missing sessions are created from the recipients' published pre-keys.
    /// Every touched session is persisted in the same transaction that
    /// produces the ciphertext.
    pub fn encrypt(
        &self,
        from: &DeviceAddress,
        recipients: &[DeviceAddress],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, StoreError> {
        if recipients.is_empty() {
            return Err(StoreError::InvalidRecipients);
        }

        let local = from.to_string();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let account = self.load_account(&tx, &local)?;

        let mut seen = BTreeSet::new();
        let mut sessions: Vec<(String, Session)> = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let remote = recipient.to_string();
            if !seen.insert(remote.clone()) {
                continue;
            }
            let session = match self.load_session(&tx, &local, &remote)? {
                Some(session) => session,
                None => self.outbound_session(&account, recipient)?,
            };
            sessions.push((remote, session));
        }

        let ciphertext = {
            let mut group = GroupSession::new();
            for (remote, session) in sessions.iter_mut() {
                group.add_participant(remote, session);
            }
            group.encrypt(plaintext)?
        };

        for (remote, session) in &sessions {
            self.save_session(&tx, &local, remote, session)?;
        }
        tx.commit()?;
        Ok(ciphertext)
    }

    /// Decrypts a group message from `sender` addressed to the local device
    /// `to`, delivered at `offset`.
    ///
    /// A pre-key message that does not match the stored session replaces it.
    /// A desynchronized existing session is purged and reported as
    /// [`StoreError::DecryptionFailed`]. A pre-key message that cannot open
    /// a new session (for example one built on a key this account never
    /// had) is reported the same way and leaves the store untouched. On
    /// success the session, the account and the offset are committed
    /// together.
    pub fn decrypt(
        &self,
        sender: &DeviceAddress,
        to: &DeviceAddress,
        offset: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, StoreError> {
        let local = to.to_string();
        let remote = sender.to_string();
        let offset = super::accounts::to_sql_offset(offset)?;
        let message = GroupMessage::from_bytes(ciphertext)?;
        let wrapped = message
            .recipient(&local)
            .ok_or_else(|| StoreError::UnknownRecipient(local.clone()))?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut account = self.load_account(&tx, &local)?;

        let (mut session, created) = match (self.load_session(&tx, &local, &remote)?, wrapped.as_pre_key()) {
            (Some(existing), Some(pre_key)) if !existing.matches_inbound_session(pre_key) => {
                debug!("{} restarted negotiation with {}", remote, local);
                (self.inbound_session(&account, sender, pre_key)?, true)
            }
            (Some(existing), _) => (existing, false),
            (None, Some(pre_key)) => (self.inbound_session(&account, sender, pre_key)?, true),
            (None, None) => {
                warn!("No session between {} and {} for a normal message", local, remote);
                return Err(StoreError::DecryptionFailed { sender: remote });
            }
        };

        let plaintext = match GroupSession::decrypt(&message, &local, &mut session) {
            Ok(plaintext) => plaintext,
            Err(e) if e.is_desync() => {
                if created {
                    warn!("Rejected new session from {} to {}: {}", remote, local, e);
                } else {
                    Self::delete_session(&tx, &local, &remote)?;
                    tx.commit()?;
                    warn!("Purged session between {} and {}: {}", local, remote, e);
                }
                return Err(StoreError::DecryptionFailed { sender: remote });
            }
            Err(e) => return Err(e.into()),
        };

        if created {
            account.remove_one_time_keys(&session)?;
            self.save_account(&tx, &local, &account)?;
        }
        self.save_session(&tx, &local, &remote, &session)?;
        tx.execute(
            "UPDATE accounts SET \"offset\" = MAX(\"offset\", ?2) WHERE as_identifier = ?1",
            params![local, offset],
        )?;
        tx.commit()?;
        drop(conn);

        if created {
            info!("Established inbound session {} -> {}", remote, local);
            self.replenish_one_time_keys(to);
        }
        Ok(plaintext)
    }

    pub fn has_session(&self, local: &DeviceAddress, remote: &DeviceAddress) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE as_identifier = ?1 AND with_identifier = ?2",
            params![local.to_string(), remote.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Drops the session with `remote` so the next send negotiates afresh.
    pub fn purge_session(&self, local: &DeviceAddress, remote: &DeviceAddress) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let purged = Self::delete_session(&conn, &local.to_string(), &remote.to_string())?;
        if purged {
            info!("Purged session between {} and {}", local, remote);
        }
        Ok(purged)
    }

    fn outbound_session(&self, account: &Account, recipient: &DeviceAddress) -> Result<Session, StoreError> {
        let history = self.resolver.history(&recipient.identity)?;
        let active = history
            .active_device(&recipient.device)
            .filter(|op| history.is_key_valid(&op.kid, crate::clock::unix_now()))
            .ok_or_else(|| StoreError::InactiveDevice(recipient.to_string()))?;

        let pre_key = match self.resolver.device_key(recipient) {
            Ok(pre_key) => pre_key,
            Err(PkiError::NoPreKeys(_)) => return Err(StoreError::NoOneTimeKeys(recipient.to_string())),
            Err(e) => return Err(e.into()),
        };

        info!("Creating outbound session to {} with pre-key {}", recipient, pre_key.id);
        Ok(account.create_outbound_session(&active.public_key, &pre_key))
    }

    fn inbound_session(
        &self,
        account: &Account,
        sender: &DeviceAddress,
        message: &PreKeyMessage,
    ) -> Result<Session, StoreError> {
        let history = self.resolver.history(&sender.identity)?;
        let trusted = history
            .active_device(&sender.device)
            .is_some_and(|op| op.public_key == message.identity_key);
        if !trusted {
            return Err(StoreError::UntrustedSender(sender.to_string()));
        }
        account.create_inbound_session(message).map_err(|e| {
            if e.is_desync() {
                warn!("Cannot open session from {}: {}", sender, e);
                StoreError::DecryptionFailed {
                    sender: sender.to_string(),
                }
            } else {
                e.into()
            }
        })
    }
}
