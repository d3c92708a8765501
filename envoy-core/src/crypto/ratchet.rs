// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Double Ratchet Protocol
//!
//! Forward-secret, per-message-key encryption between two fixed endpoints.
//! Combines a DH ratchet (X25519) for break-in recovery with symmetric chain
//! ratchets for forward secrecy. Skipped message keys are indexed by the
//! sender's ratchet public key and message index.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use zeroize::Zeroize;

use super::chain::{ChainError, ChainKey, MessageKey};
use super::encryption::{decrypt_with_aad, encrypt_with_aad, EncryptionError, SymmetricKey};
use super::kdf::HKDF;
use super::keys::X25519KeyPair;

/// Maximum number of skipped message keys to store.
const MAX_SKIPPED_KEYS: usize = 1000;

/// KDF info for root chain steps.
const ROOT_RATCHET_INFO: &[u8] = b"Envoy_Root_Ratchet";

/// Double Ratchet error types.
#[derive(Error, Debug)]
pub enum RatchetError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Too many skipped messages")]
    TooManySkipped,

    #[error("Duplicate message (already decrypted)")]
    DuplicateMessage,

    #[error("Cannot send: no sending chain (responder must receive first)")]
    NoSendingChain,
}

/// Header sent in clear alongside each ratchet message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetHeader {
    /// Sender's current ratchet public key.
    #[serde(with = "crate::encoding::base64_array")]
    pub ratchet_key: [u8; 32],
    /// Length of the sender's previous sending chain.
    pub previous_chain_length: u32,
    /// Index of this message in the sending chain.
    pub index: u32,
}

impl RatchetHeader {
    /// Canonical bytes authenticated as associated data.
    fn to_aad(&self) -> [u8; 40] {
        let mut aad = [0u8; 40];
        aad[..32].copy_from_slice(&self.ratchet_key);
        aad[32..36].copy_from_slice(&self.previous_chain_length.to_be_bytes());
        aad[36..].copy_from_slice(&self.index.to_be_bytes());
        aad
    }
}

/// A ratcheted message ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetMessage {
    pub header: RatchetHeader,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Serializable snapshot of a [`RatchetState`]. Zeroized on drop.
#[derive(Serialize, Deserialize)]
pub struct RatchetSnapshot {
    root_key: [u8; 32],
    our_ratchet_secret: [u8; 32],
    their_ratchet_key: Option<[u8; 32]>,
    sending: Option<([u8; 32], u32)>,
    receiving: Option<([u8; 32], u32)>,
    previous_sending_length: u32,
    skipped: Vec<([u8; 32], u32, [u8; 32])>,
}

impl Drop for RatchetSnapshot {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.our_ratchet_secret.zeroize();
        if let Some((ref mut key, _)) = self.sending {
            key.zeroize();
        }
        if let Some((ref mut key, _)) = self.receiving {
            key.zeroize();
        }
        for (_, _, key) in self.skipped.iter_mut() {
            key.zeroize();
        }
    }
}

/// The Double Ratchet state machine for one peer.
#[derive(Clone)]
pub struct RatchetState {
    root_key: [u8; 32],
    our_ratchet: X25519KeyPair,
    their_ratchet_key: Option<[u8; 32]>,
    sending: Option<ChainKey>,
    receiving: Option<ChainKey>,
    previous_sending_length: u32,
    skipped: HashMap<([u8; 32], u32), MessageKey>,
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("sending", &self.sending.as_ref().map(ChainKey::generation))
            .field("receiving", &self.receiving.as_ref().map(ChainKey::generation))
            .field("skipped_keys_count", &self.skipped.len())
            .finish()
    }
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.skipped.clear();
    }
}

impl RatchetState {
    /// Initializes the side that sends first, knowing the peer's ratchet key.
    pub fn initiator(shared_secret: &SymmetricKey, their_ratchet_key: [u8; 32]) -> Self {
        let our_ratchet = X25519KeyPair::generate();
        let dh_output = our_ratchet.diffie_hellman(&their_ratchet_key);
        let (root_key, send_chain_key) = HKDF::derive_key_pair(
            Some(shared_secret.as_bytes()),
            &dh_output,
            ROOT_RATCHET_INFO,
        );

        RatchetState {
            root_key,
            our_ratchet,
            their_ratchet_key: Some(their_ratchet_key),
            sending: Some(ChainKey::new(send_chain_key)),
            receiving: None,
            previous_sending_length: 0,
            skipped: HashMap::new(),
        }
    }

    /// Initializes the side that receives first, owning the ratchet key the
    /// initiator used.
    pub fn responder(shared_secret: &SymmetricKey, our_ratchet: X25519KeyPair) -> Self {
        RatchetState {
            root_key: *shared_secret.as_bytes(),
            our_ratchet,
            their_ratchet_key: None,
            sending: None,
            receiving: None,
            previous_sending_length: 0,
            skipped: HashMap::new(),
        }
    }

    /// Returns true once this side can send.
    pub fn can_send(&self) -> bool {
        self.sending.is_some()
    }

    pub fn skipped_keys_count(&self) -> usize {
        self.skipped.len()
    }

    /// Encrypts a message, advancing the sending chain.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, RatchetError> {
        let sending = self.sending.as_ref().ok_or(RatchetError::NoSendingChain)?;
        let (message_key, next_chain) = sending.ratchet();

        let header = RatchetHeader {
            ratchet_key: *self.our_ratchet.public_key(),
            previous_chain_length: self.previous_sending_length,
            index: message_key.generation(),
        };
        let ciphertext =
            encrypt_with_aad(message_key.symmetric_key(), plaintext, &header.to_aad())?;

        self.sending = Some(next_chain);
        Ok(RatchetMessage { header, ciphertext })
    }

    /// Decrypts a message, performing DH ratchet steps and handling
    /// out-of-order delivery.
    ///
    /// The state is mutated even when decryption fails; callers needing
    /// atomicity decrypt on a clone.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, RatchetError> {
        let header = &message.header;
        let aad = header.to_aad();

        if let Some(key) = self.skipped.remove(&(header.ratchet_key, header.index)) {
            return Ok(decrypt_with_aad(
                key.symmetric_key(),
                &message.ciphertext,
                &aad,
            )?);
        }

        if self.their_ratchet_key != Some(header.ratchet_key) {
            self.skip_until(header.previous_chain_length)?;
            self.step(header.ratchet_key);
        }

        self.skip_until(header.index)?;

        let receiving = self
            .receiving
            .as_ref()
            .ok_or(RatchetError::DuplicateMessage)?;
        if header.index < receiving.generation() {
            return Err(RatchetError::DuplicateMessage);
        }

        let (message_key, next_chain) = receiving.ratchet();
        self.receiving = Some(next_chain);

        Ok(decrypt_with_aad(
            message_key.symmetric_key(),
            &message.ciphertext,
            &aad,
        )?)
    }

    /// Stores keys for messages of the current receiving chain up to `until`.
    fn skip_until(&mut self, until: u32) -> Result<(), RatchetError> {
        let (Some(receiving), Some(their_key)) = (&self.receiving, self.their_ratchet_key) else {
            return Ok(());
        };

        let current = receiving.generation();
        if until <= current {
            return Ok(());
        }
        if self.skipped.len() + (until - current) as usize > MAX_SKIPPED_KEYS {
            return Err(RatchetError::TooManySkipped);
        }

        let (keys, next_chain) = receiving.skip_to(until)?;
        self.receiving = Some(next_chain);
        for key in keys {
            self.skipped.insert((their_key, key.generation()), key);
        }
        Ok(())
    }

    /// Performs a DH ratchet step towards the peer's new ratchet key.
    fn step(&mut self, their_new_key: [u8; 32]) {
        self.previous_sending_length = self.sending.as_ref().map_or(0, ChainKey::generation);
        self.their_ratchet_key = Some(their_new_key);

        let dh_recv = self.our_ratchet.diffie_hellman(&their_new_key);
        let (root_key, recv_chain_key) =
            HKDF::derive_key_pair(Some(&self.root_key), &dh_recv, ROOT_RATCHET_INFO);
        self.root_key = root_key;
        self.receiving = Some(ChainKey::new(recv_chain_key));

        self.our_ratchet = X25519KeyPair::generate();
        let dh_send = self.our_ratchet.diffie_hellman(&their_new_key);
        let (root_key, send_chain_key) =
            HKDF::derive_key_pair(Some(&self.root_key), &dh_send, ROOT_RATCHET_INFO);
        self.root_key = root_key;
        self.sending = Some(ChainKey::new(send_chain_key));
    }

    pub fn snapshot(&self) -> RatchetSnapshot {
        RatchetSnapshot {
            root_key: self.root_key,
            our_ratchet_secret: self.our_ratchet.secret_bytes(),
            their_ratchet_key: self.their_ratchet_key,
            sending: self
                .sending
                .as_ref()
                .map(|c| (*c.as_bytes(), c.generation())),
            receiving: self
                .receiving
                .as_ref()
                .map(|c| (*c.as_bytes(), c.generation())),
            previous_sending_length: self.previous_sending_length,
            skipped: self
                .skipped
                .iter()
                .map(|((their_key, index), key)| {
                    (*their_key, *index, *key.symmetric_key().as_bytes())
                })
                .collect(),
        }
    }

    pub fn restore(mut s: RatchetSnapshot) -> Self {
        // Take values out, leaving zeros behind for the snapshot's Drop
        let root_key = std::mem::take(&mut s.root_key);
        let our_ratchet = X25519KeyPair::from_bytes(std::mem::take(&mut s.our_ratchet_secret));
        let sending = s
            .sending
            .take()
            .map(|(key, generation)| ChainKey::with_generation(key, generation));
        let receiving = s
            .receiving
            .take()
            .map(|(key, generation)| ChainKey::with_generation(key, generation));
        let skipped = std::mem::take(&mut s.skipped)
            .into_iter()
            .map(|(their_key, index, key)| {
                ((their_key, index), MessageKey::from_bytes(key, index))
            })
            .collect();

        RatchetState {
            root_key,
            our_ratchet,
            their_ratchet_key: s.their_ratchet_key,
            sending,
            receiving,
            previous_sending_length: s.previous_sending_length,
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (RatchetState, RatchetState) {
        let secret = SymmetricKey::generate();
        let bob_key = X25519KeyPair::generate();
        let alice = RatchetState::initiator(&secret, *bob_key.public_key());
        let bob = RatchetState::responder(&secret, bob_key);
        (alice, bob)
    }

    #[test]
    fn test_responder_cannot_send_first() {
        let (_, mut bob) = pair();
        assert!(!bob.can_send());
        assert!(matches!(
            bob.encrypt(b"too early"),
            Err(RatchetError::NoSendingChain)
        ));
    }

    #[test]
    fn test_ping_pong_with_dh_steps() {
        let (mut alice, mut bob) = pair();

        for round in 0..4 {
            let text = format!("alice {}", round);
            let msg = alice.encrypt(text.as_bytes()).unwrap();
            assert_eq!(bob.decrypt(&msg).unwrap(), text.as_bytes());

            let text = format!("bob {}", round);
            let msg = bob.encrypt(text.as_bytes()).unwrap();
            assert_eq!(alice.decrypt(&msg).unwrap(), text.as_bytes());
        }
    }

    #[test]
    fn test_out_of_order_across_ratchet_step() {
        let (mut alice, mut bob) = pair();

        let first = alice.encrypt(b"one").unwrap();
        let second = alice.encrypt(b"two").unwrap();
        assert_eq!(bob.decrypt(&second).unwrap(), b"two");
        assert_eq!(bob.skipped_keys_count(), 1);

        let reply = bob.encrypt(b"reply").unwrap();
        alice.decrypt(&reply).unwrap();
        let third = alice.encrypt(b"three").unwrap();
        assert_eq!(bob.decrypt(&third).unwrap(), b"three");

        assert_eq!(bob.decrypt(&first).unwrap(), b"one");
        assert_eq!(bob.skipped_keys_count(), 0);
    }

    #[test]
    fn test_replay_is_rejected() {
        let (mut alice, mut bob) = pair();
        let msg = alice.encrypt(b"once").unwrap();
        bob.decrypt(&msg).unwrap();
        assert!(matches!(
            bob.decrypt(&msg),
            Err(RatchetError::DuplicateMessage)
        ));
    }

    #[test]
    fn test_tampered_header_fails_authentication() {
        let (mut alice, mut bob) = pair();
        alice.encrypt(b"zero").unwrap();
        let mut msg = alice.encrypt(b"one").unwrap();
        msg.header.previous_chain_length = 7;
        assert!(matches!(
            bob.decrypt(&msg),
            Err(RatchetError::Encryption(EncryptionError::DecryptionFailed))
        ));
    }

    #[test]
    fn test_snapshot_restore_continues_conversation() {
        let (mut alice, mut bob) = pair();
        bob.decrypt(&alice.encrypt(b"hello").unwrap()).unwrap();

        let mut alice = RatchetState::restore(alice.snapshot());
        let mut bob = RatchetState::restore(bob.snapshot());

        let reply = bob.encrypt(b"hi").unwrap();
        assert_eq!(alice.decrypt(&reply).unwrap(), b"hi");
    }
}
