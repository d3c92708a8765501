// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ratchet Accounts
//!
//! An [`Account`] owns the long-term identity key of one local device and its
//! pool of one-time pre-keys, and creates sessions with remote devices.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroize;

use super::pickle;
use super::session::{PreKeyMessage, Session};
use super::EngineError;
use crate::crypto::{RatchetState, SeedKeys, SymmetricKey, X25519KeyPair, HKDF};

/// Maximum number of one-time keys an account retains.
pub const MAX_ONE_TIME_KEYS: usize = 1000;

const SESSION_SECRET_INFO: &[u8] = b"Envoy_Session_Secret";

/// Public half of a one-time pre-key, as published for peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKey {
    pub id: u32,
    #[serde(with = "crate::encoding::base64_array")]
    pub public_key: [u8; 32],
}

#[derive(Clone)]
struct OneTimeKey {
    pair: X25519KeyPair,
    published: bool,
}

#[derive(Serialize, Deserialize)]
struct AccountPickle {
    identity_secret: [u8; 32],
    one_time_keys: Vec<(u32, [u8; 32], bool)>,
    next_key_id: u32,
}

impl Drop for AccountPickle {
    fn drop(&mut self) {
        self.identity_secret.zeroize();
        for (_, secret, _) in self.one_time_keys.iter_mut() {
            secret.zeroize();
        }
    }
}

/// Long-term ratchet state of one local device.
pub struct Account {
    identity: X25519KeyPair,
    one_time_keys: BTreeMap<u32, OneTimeKey>,
    next_key_id: u32,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("identity", &hex::encode(self.identity.public_key()))
            .field("one_time_keys", &self.one_time_keys.len())
            .finish()
    }
}

impl Account {
    /// Creates the account for a device seed. The identity key is
    /// deterministic in the seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Account {
            identity: X25519KeyPair::from_bytes(SeedKeys::identity_secret(seed)),
            one_time_keys: BTreeMap::new(),
            next_key_id: 1,
        }
    }

    pub fn identity_key(&self) -> [u8; 32] {
        *self.identity.public_key()
    }

    /// Generates `count` fresh one-time keys, dropping the oldest ones beyond
    /// [`MAX_ONE_TIME_KEYS`].
    pub fn generate_one_time_keys(&mut self, count: usize) {
        for _ in 0..count {
            let id = self.next_key_id;
            self.next_key_id = self.next_key_id.wrapping_add(1).max(1);
            self.one_time_keys.insert(
                id,
                OneTimeKey {
                    pair: X25519KeyPair::generate(),
                    published: false,
                },
            );
        }
        while self.one_time_keys.len() > MAX_ONE_TIME_KEYS {
            self.one_time_keys.pop_first();
        }
    }

    /// One-time keys not yet marked as published.
    pub fn one_time_keys(&self) -> Vec<PreKey> {
        self.one_time_keys
            .iter()
            .filter(|(_, key)| !key.published)
            .map(|(id, key)| PreKey {
                id: *id,
                public_key: *key.pair.public_key(),
            })
            .collect()
    }

    /// Number of one-time keys held, published or not.
    pub fn one_time_key_count(&self) -> usize {
        self.one_time_keys.len()
    }

    /// Marks the keys with the given ids as published. Keys generated after
    /// the publication was prepared stay pending.
    pub fn mark_keys_as_published(&mut self, ids: &[u32]) {
        for id in ids {
            if let Some(key) = self.one_time_keys.get_mut(id) {
                key.published = true;
            }
        }
    }

    /// Forgets the one-time key consumed by an inbound session.
    pub fn remove_one_time_keys(&mut self, session: &Session) -> Result<(), EngineError> {
        let Some(id) = session.one_time_key_id() else {
            return Ok(());
        };
        self.one_time_keys
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::UnknownOneTimeKey(id))
    }

    /// Starts a session with a remote device from its identity key and one
    /// of its published one-time keys.
    pub fn create_outbound_session(&self, their_identity_key: &[u8; 32], their_pre_key: &PreKey) -> Session {
        let base = X25519KeyPair::generate();
        let secret = agree(
            self.identity.diffie_hellman(&their_pre_key.public_key),
            base.diffie_hellman(their_identity_key),
            base.diffie_hellman(&their_pre_key.public_key),
        );

        Session::outbound(
            self.identity_key(),
            *their_identity_key,
            their_pre_key.id,
            &their_pre_key.public_key,
            *base.public_key(),
            RatchetState::initiator(&secret, their_pre_key.public_key),
        )
    }

    /// Creates the session matching a peer's [`PreKeyMessage`]. The message
    /// itself still has to be decrypted with the returned session.
    pub fn create_inbound_session(&self, message: &PreKeyMessage) -> Result<Session, EngineError> {
        let key = self
            .one_time_keys
            .get(&message.one_time_key_id)
            .ok_or(EngineError::UnknownOneTimeKey(message.one_time_key_id))?;

        let secret = agree(
            key.pair.diffie_hellman(&message.identity_key),
            self.identity.diffie_hellman(&message.base_key),
            key.pair.diffie_hellman(&message.base_key),
        );

        Ok(Session::inbound(
            message,
            key.pair.public_key(),
            RatchetState::responder(&secret, key.pair.clone()),
        ))
    }

    pub fn pickle(&self, key: &SymmetricKey) -> Result<Vec<u8>, EngineError> {
        pickle::seal(
            key,
            &AccountPickle {
                identity_secret: self.identity.secret_bytes(),
                one_time_keys: self
                    .one_time_keys
                    .iter()
                    .map(|(id, k)| (*id, k.pair.secret_bytes(), k.published))
                    .collect(),
                next_key_id: self.next_key_id,
            },
        )
    }

    pub fn from_pickle(key: &SymmetricKey, pickle: &[u8]) -> Result<Self, EngineError> {
        let snapshot: AccountPickle = pickle::open(key, pickle)?;
        Ok(Account {
            identity: X25519KeyPair::from_bytes(snapshot.identity_secret),
            one_time_keys: snapshot
                .one_time_keys
                .iter()
                .map(|(id, secret, published)| {
                    (
                        *id,
                        OneTimeKey {
                            pair: X25519KeyPair::from_bytes(*secret),
                            published: *published,
                        },
                    )
                })
                .collect(),
            next_key_id: snapshot.next_key_id,
        })
    }
}

/// Derives the initial root secret from the three DH outputs.
fn agree(mut dh1: [u8; 32], mut dh2: [u8; 32], mut dh3: [u8; 32]) -> SymmetricKey {
    let mut ikm = [0u8; 96];
    ikm[..32].copy_from_slice(&dh1);
    ikm[32..64].copy_from_slice(&dh2);
    ikm[64..].copy_from_slice(&dh3);
    let secret = SymmetricKey::from_bytes(HKDF::derive_key(None, &ikm, SESSION_SECRET_INFO));

    ikm.zeroize();
    dh1.zeroize();
    dh2.zeroize();
    dh3.zeroize();
    secret
}
