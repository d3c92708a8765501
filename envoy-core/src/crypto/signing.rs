// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ed25519 signing.

use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use thiserror::Error;

/// Signing error types.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Invalid signing seed")]
    InvalidSeed,
    #[error("Invalid signature length: {0}")]
    InvalidSignatureLength(usize),
}

/// Ed25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    bytes: [u8; 32],
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verifies `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        UnparsedPublicKey::new(&signature::ED25519, &self.bytes)
            .verify(message, &signature.bytes)
            .is_ok()
    }
}

/// Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; 64],
}

impl Signature {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SigningError> {
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| SigningError::InvalidSignatureLength(bytes.len()))?;
        Ok(Signature { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

/// Ed25519 key pair restored deterministically from a 32-byte seed.
pub struct SigningKeyPair {
    pair: Ed25519KeyPair,
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &hex::encode(self.public_key().as_bytes()))
            .finish()
    }
}

impl SigningKeyPair {
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, SigningError> {
        let pair =
            Ed25519KeyPair::from_seed_unchecked(seed).map_err(|_| SigningError::InvalidSeed)?;
        Ok(SigningKeyPair { pair })
    }

    pub fn public_key(&self) -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.pair.public_key().as_ref());
        PublicKey { bytes }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(self.pair.sign(message).as_ref());
        Signature { bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let pair = SigningKeyPair::from_seed(&[3u8; 32]).unwrap();
        let signature = pair.sign(b"message");
        assert!(pair.public_key().verify(b"message", &signature));
        assert!(!pair.public_key().verify(b"other", &signature));
    }

    #[test]
    fn test_same_seed_same_key() {
        let a = SigningKeyPair::from_seed(&[9u8; 32]).unwrap();
        let b = SigningKeyPair::from_seed(&[9u8; 32]).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_signature_length_checked() {
        assert!(matches!(
            Signature::from_slice(&[0u8; 10]),
            Err(SigningError::InvalidSignatureLength(10))
        ));
    }
}
