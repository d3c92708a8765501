// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pairwise Ratchet Sessions
//!
//! A [`Session`] wraps one [`RatchetState`] between a local device and one
//! remote device. Until the initiating side has received anything back, its
//! messages are wrapped in a [`PreKeyMessage`] so the peer can create the
//! matching inbound session.

use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};

use super::pickle;
use super::EngineError;
use crate::crypto::ratchet::RatchetSnapshot;
use crate::crypto::{RatchetMessage, RatchetState, SymmetricKey};

/// First message of a session, carrying what the receiver needs to run the
/// key agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMessage {
    /// Id of the receiver's one-time key that was used.
    pub one_time_key_id: u32,
    /// Sender's ephemeral base key.
    #[serde(with = "crate::encoding::base64_array")]
    pub base_key: [u8; 32],
    /// Sender's identity key.
    #[serde(with = "crate::encoding::base64_array")]
    pub identity_key: [u8; 32],
    pub message: RatchetMessage,
}

/// A message produced by [`Session::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    PreKey(PreKeyMessage),
    Normal(RatchetMessage),
}

impl SessionMessage {
    /// Returns the pre-key wrapper if this message can start a session.
    pub fn as_pre_key(&self) -> Option<&PreKeyMessage> {
        match self {
            SessionMessage::PreKey(message) => Some(message),
            SessionMessage::Normal(_) => None,
        }
    }

    fn ratchet_message(&self) -> &RatchetMessage {
        match self {
            SessionMessage::PreKey(message) => &message.message,
            SessionMessage::Normal(message) => message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OutboundPreKey {
    one_time_key_id: u32,
    base_key: [u8; 32],
    identity_key: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct SessionPickle {
    id: String,
    their_identity_key: [u8; 32],
    ratchet: RatchetSnapshot,
    outbound_pre_key: Option<OutboundPreKey>,
    inbound_base_key: Option<[u8; 32]>,
    one_time_key_id: Option<u32>,
}

/// Ratchet session with one remote device.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    their_identity_key: [u8; 32],
    ratchet: RatchetState,
    outbound_pre_key: Option<OutboundPreKey>,
    inbound_base_key: Option<[u8; 32]>,
    one_time_key_id: Option<u32>,
}

impl Session {
    pub(crate) fn outbound(
        our_identity_key: [u8; 32],
        their_identity_key: [u8; 32],
        one_time_key_id: u32,
        one_time_key: &[u8; 32],
        base_key: [u8; 32],
        ratchet: RatchetState,
    ) -> Self {
        Session {
            id: session_id(&our_identity_key, &base_key, one_time_key),
            their_identity_key,
            ratchet,
            outbound_pre_key: Some(OutboundPreKey {
                one_time_key_id,
                base_key,
                identity_key: our_identity_key,
            }),
            inbound_base_key: None,
            one_time_key_id: None,
        }
    }

    pub(crate) fn inbound(message: &PreKeyMessage, one_time_key: &[u8; 32], ratchet: RatchetState) -> Self {
        Session {
            id: session_id(&message.identity_key, &message.base_key, one_time_key),
            their_identity_key: message.identity_key,
            ratchet,
            outbound_pre_key: None,
            inbound_base_key: Some(message.base_key),
            one_time_key_id: Some(message.one_time_key_id),
        }
    }

    /// Identifier shared by both ends of the session.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn their_identity_key(&self) -> &[u8; 32] {
        &self.their_identity_key
    }

    /// Local one-time key this session was created from (inbound only).
    pub fn one_time_key_id(&self) -> Option<u32> {
        self.one_time_key_id
    }

    /// Encrypts a message, wrapping it as a pre-key message while the peer
    /// has not answered yet.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<SessionMessage, EngineError> {
        let message = self.ratchet.encrypt(plaintext)?;
        Ok(match &self.outbound_pre_key {
            Some(pre_key) => SessionMessage::PreKey(PreKeyMessage {
                one_time_key_id: pre_key.one_time_key_id,
                base_key: pre_key.base_key,
                identity_key: pre_key.identity_key,
                message,
            }),
            None => SessionMessage::Normal(message),
        })
    }

    /// Decrypts a message. On error the session is left untouched.
    pub fn decrypt(&mut self, message: &SessionMessage) -> Result<Vec<u8>, EngineError> {
        let mut next = self.ratchet.clone();
        let plaintext = next.decrypt(message.ratchet_message())?;
        self.ratchet = next;
        self.outbound_pre_key = None;
        Ok(plaintext)
    }

    /// True if `message` was produced by the peer end of this very session.
    ///
    /// A pre-key message that does not match means the peer started a new
    /// negotiation.
    pub fn matches_inbound_session(&self, message: &PreKeyMessage) -> bool {
        message.identity_key == self.their_identity_key
            && self.inbound_base_key == Some(message.base_key)
    }

    pub fn pickle(&self, key: &SymmetricKey) -> Result<Vec<u8>, EngineError> {
        pickle::seal(
            key,
            &SessionPickle {
                id: self.id.clone(),
                their_identity_key: self.their_identity_key,
                ratchet: self.ratchet.snapshot(),
                outbound_pre_key: self.outbound_pre_key.clone(),
                inbound_base_key: self.inbound_base_key,
                one_time_key_id: self.one_time_key_id,
            },
        )
    }

    pub fn from_pickle(key: &SymmetricKey, pickle: &[u8]) -> Result<Self, EngineError> {
        let SessionPickle {
            id,
            their_identity_key,
            ratchet,
            outbound_pre_key,
            inbound_base_key,
            one_time_key_id,
        } = pickle::open(key, pickle)?;

        Ok(Session {
            id,
            their_identity_key,
            ratchet: RatchetState::restore(ratchet),
            outbound_pre_key,
            inbound_base_key,
            one_time_key_id,
        })
    }
}

fn session_id(initiator_identity: &[u8; 32], base_key: &[u8; 32], one_time_key: &[u8; 32]) -> String {
    let mut ctx = Context::new(&SHA256);
    ctx.update(initiator_identity);
    ctx.update(base_key);
    ctx.update(one_time_key);
    hex::encode(ctx.finish().as_ref())
}
