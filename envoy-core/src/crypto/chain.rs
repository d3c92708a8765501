// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chain Key Ratcheting
//!
//! Symmetric key ratcheting for the double ratchet. Each chain key derives one
//! message key and the next chain key.

use super::encryption::SymmetricKey;
use super::kdf::HKDF;
use thiserror::Error;
use zeroize::Zeroize;

/// Maximum number of keys that can be skipped in one step.
pub const MAX_SKIP: u32 = 1000;

/// Chain key ratcheting error types.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Skip limit exceeded (max {MAX_SKIP} keys)")]
    SkipLimitExceeded,

    #[error("Cannot skip backwards (current: {current}, target: {target})")]
    CannotSkipBackwards { current: u32, target: u32 },
}

/// KDF info constants for domain separation.
const CHAIN_KEY_INFO: &[u8] = b"Envoy_Chain_Key";
const MESSAGE_KEY_INFO: &[u8] = b"Envoy_Message_Key";

/// A chain key used for symmetric ratcheting.
///
/// Chain keys are never used directly for encryption. They derive:
/// - Message keys (for actual encryption)
/// - The next chain key (for ratcheting forward)
#[derive(Clone)]
pub struct ChainKey {
    key: [u8; 32],
    generation: u32,
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKey")
            .field("key", &"[REDACTED]")
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl ChainKey {
    /// Creates a new chain key at generation 0.
    pub fn new(key: [u8; 32]) -> Self {
        ChainKey { key, generation: 0 }
    }

    /// Creates a chain key at a specific generation (used when unpickling).
    pub fn with_generation(key: [u8; 32], generation: u32) -> Self {
        ChainKey { key, generation }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Advances the chain by one step:
    /// - message_key = KDF(chain_key, MESSAGE_KEY_INFO)
    /// - next_chain_key = KDF(chain_key, CHAIN_KEY_INFO)
    pub fn ratchet(&self) -> (MessageKey, ChainKey) {
        let message_key = MessageKey {
            key: SymmetricKey::from_bytes(HKDF::derive_key(None, &self.key, MESSAGE_KEY_INFO)),
            generation: self.generation,
        };

        let next_chain = ChainKey {
            key: HKDF::derive_key(None, &self.key, CHAIN_KEY_INFO),
            generation: self.generation.wrapping_add(1),
        };

        (message_key, next_chain)
    }

    /// Skips forward to `target`, returning the message keys in between.
    pub fn skip_to(&self, target: u32) -> Result<(Vec<MessageKey>, ChainKey), ChainError> {
        if target < self.generation {
            return Err(ChainError::CannotSkipBackwards {
                current: self.generation,
                target,
            });
        }

        let skip_count = target - self.generation;
        if skip_count > MAX_SKIP {
            return Err(ChainError::SkipLimitExceeded);
        }

        let mut keys = Vec::with_capacity(skip_count as usize);
        let mut current = self.clone();

        while current.generation < target {
            let (msg_key, next) = current.ratchet();
            keys.push(msg_key);
            current = next;
        }

        Ok((keys, current))
    }

    /// Raw key bytes (for pickling).
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// A single-use message key derived from a chain key.
#[derive(Clone)]
pub struct MessageKey {
    key: SymmetricKey,
    generation: u32,
}

impl MessageKey {
    pub fn from_bytes(bytes: [u8; 32], generation: u32) -> Self {
        MessageKey {
            key: SymmetricKey::from_bytes(bytes),
            generation,
        }
    }

    pub fn symmetric_key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}
