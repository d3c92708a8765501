// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key Histories
//!
//! An append-only log of key additions and revocations for one identity.
//! Every operation carries the SHA-256 hash of its predecessor, so a
//! rewritten history fails [`KeyHistory::new`].

use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};

use super::PkiError;
use crate::crypto::PublicKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Add,
    Revoke,
}

/// One entry of a key history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOperation {
    pub sequence: u64,
    pub timestamp: i64,
    pub action: KeyAction,
    pub device: String,
    /// Key id, stable for the lifetime of the key.
    pub kid: String,
    /// X25519 identity key of the device.
    #[serde(with = "crate::encoding::base64_array")]
    pub public_key: [u8; 32],
    /// Ed25519 key the device signs tokens with.
    #[serde(with = "crate::encoding::base64_array")]
    pub signing_key: [u8; 32],
    /// Hex SHA-256 of the previous operation.
    pub previous: Option<String>,
}

impl KeyOperation {
    pub fn hash(&self) -> String {
        // Field order is fixed by the struct, so the JSON form is canonical
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(digest(&SHA256, &bytes).as_ref())
    }

    pub fn signing_public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key)
    }
}

/// Derives the key id for a device key.
pub fn key_id(public_key: &[u8; 32]) -> String {
    hex::encode(&digest(&SHA256, public_key).as_ref()[..8])
}

/// Verified key history of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHistory {
    identity: String,
    operations: Vec<KeyOperation>,
}

impl KeyHistory {
    /// Verifies sequence numbers and the hash chain.
    pub fn new(identity: &str, operations: Vec<KeyOperation>) -> Result<Self, PkiError> {
        let mut previous: Option<String> = None;
        for (index, op) in operations.iter().enumerate() {
            if op.sequence != index as u64 || op.previous != previous {
                return Err(PkiError::BrokenHistory(op.sequence));
            }
            previous = Some(op.hash());
        }
        Ok(KeyHistory {
            identity: identity.to_string(),
            operations,
        })
    }

    pub fn empty(identity: &str) -> Self {
        KeyHistory {
            identity: identity.to_string(),
            operations: Vec::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn operations(&self) -> &[KeyOperation] {
        &self.operations
    }

    /// Appends an operation, filling in sequence, kid and hash link.
    pub fn append(
        &mut self,
        action: KeyAction,
        device: &str,
        public_key: [u8; 32],
        signing_key: [u8; 32],
        timestamp: i64,
    ) -> &KeyOperation {
        let op = KeyOperation {
            sequence: self.operations.len() as u64,
            timestamp,
            action,
            device: device.to_string(),
            kid: key_id(&public_key),
            public_key,
            signing_key,
            previous: self.operations.last().map(KeyOperation::hash),
        };
        self.operations.push(op);
        &self.operations[self.operations.len() - 1]
    }

    /// Latest key added for `device` that has not been revoked since.
    pub fn active_device(&self, device: &str) -> Option<&KeyOperation> {
        let mut active = None;
        for op in self.operations.iter().filter(|op| op.device == device) {
            match op.action {
                KeyAction::Add => active = Some(op),
                KeyAction::Revoke => {
                    if active.is_some_and(|a: &KeyOperation| a.kid == op.kid) {
                        active = None;
                    }
                }
            }
        }
        active
    }

    /// True if `kid` was added at or before `at` and not revoked by then.
    pub fn is_key_valid(&self, kid: &str, at: i64) -> bool {
        let in_effect = |action: KeyAction| {
            self.operations
                .iter()
                .any(|op| op.action == action && op.kid == kid && op.timestamp <= at)
        };
        in_effect(KeyAction::Add) && !in_effect(KeyAction::Revoke)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> KeyHistory {
        let mut history = KeyHistory::empty("alice");
        history.append(KeyAction::Add, "phone", [1u8; 32], [2u8; 32], 100);
        history.append(KeyAction::Add, "laptop", [3u8; 32], [4u8; 32], 200);
        history.append(KeyAction::Revoke, "phone", [1u8; 32], [2u8; 32], 300);
        history
    }

    #[test]
    fn test_active_device_and_validity() {
        let history = history();
        assert!(history.active_device("phone").is_none());
        assert_eq!(history.active_device("laptop").unwrap().public_key, [3u8; 32]);

        let phone = key_id(&[1u8; 32]);
        assert!(!history.is_key_valid(&phone, 50));
        assert!(history.is_key_valid(&phone, 150));
        assert!(!history.is_key_valid(&phone, 300));
    }

    #[test]
    fn test_tampered_history_is_rejected() {
        let mut ops = history().operations().to_vec();
        assert!(KeyHistory::new("alice", ops.clone()).is_ok());

        ops[1].public_key = [9u8; 32];
        assert_eq!(KeyHistory::new("alice", ops.clone()), Err(PkiError::BrokenHistory(2)));

        ops.remove(1);
        assert!(KeyHistory::new("alice", ops).is_err());
    }
}
