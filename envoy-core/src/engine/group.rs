// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Group Sessions
//!
//! Encrypts one plaintext once under a fresh message key and wraps that key
//! for every participant with the participant's pairwise session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroize;

use super::session::{Session, SessionMessage};
use super::EngineError;
use crate::crypto::{decrypt, encrypt, SymmetricKey};

/// Multi-recipient envelope produced by [`GroupSession::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Wrapped message key per recipient address.
    pub recipients: BTreeMap<String, SessionMessage>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub ciphertext: Vec<u8>,
}

impl GroupMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(bytes).map_err(|e| EngineError::BadMessageFormat(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(self).map_err(|e| EngineError::BadMessageFormat(e.to_string()))
    }

    /// Sub-envelope addressed to `address`.
    pub fn recipient(&self, address: &str) -> Option<&SessionMessage> {
        self.recipients.get(address)
    }
}

/// Transient encryption context over several pairwise sessions.
#[derive(Default)]
pub struct GroupSession<'a> {
    participants: Vec<(&'a str, &'a mut Session)>,
}

impl<'a> GroupSession<'a> {
    pub fn new() -> Self {
        GroupSession {
            participants: Vec::new(),
        }
    }

    pub fn add_participant(&mut self, address: &'a str, session: &'a mut Session) {
        self.participants.push((address, session));
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Encrypts `plaintext` for every participant and returns the serialized
    /// [`GroupMessage`]. Every participant session advances.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        if self.participants.is_empty() {
            return Err(EngineError::NoParticipants);
        }

        let message_key = SymmetricKey::generate();
        let ciphertext =
            encrypt(&message_key, plaintext).map_err(|e| EngineError::BadMessageFormat(e.to_string()))?;

        let mut recipients = BTreeMap::new();
        for (address, session) in self.participants.iter_mut() {
            recipients.insert(address.to_string(), session.encrypt(message_key.as_bytes())?);
        }

        GroupMessage {
            recipients,
            ciphertext,
        }
        .to_bytes()
    }

    /// Opens the part of `message` addressed to `address`. The session only
    /// advances if the whole envelope decrypts.
    pub fn decrypt(message: &GroupMessage, address: &str, session: &mut Session) -> Result<Vec<u8>, EngineError> {
        let wrapped = message
            .recipient(address)
            .ok_or_else(|| EngineError::UnknownRecipient(address.to_string()))?;

        let mut next = session.clone();
        let mut key_bytes = next.decrypt(wrapped)?;
        let key: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::BadMessageFormat("wrapped key has wrong length".into()))?;
        key_bytes.zeroize();

        let plaintext =
            decrypt(&SymmetricKey::from_bytes(key), &message.ciphertext).map_err(|_| EngineError::BadMessageMac)?;
        *session = next;
        Ok(plaintext)
    }
}
