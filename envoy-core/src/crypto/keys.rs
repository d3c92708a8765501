// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! X25519 key pairs and seed-derived device keys.

use x25519_dalek::{PublicKey, StaticSecret};

use super::encryption::SymmetricKey;
use super::kdf::HKDF;

const IDENTITY_KEY_INFO: &[u8] = b"Envoy_Identity_Key";
const SIGNING_SEED_INFO: &[u8] = b"Envoy_Signing_Seed";
const STORAGE_KEY_INFO: &[u8] = b"Envoy_Storage_Key";

/// X25519 Diffie-Hellman key pair. The secret is zeroized on drop.
#[derive(Clone)]
pub struct X25519KeyPair {
    secret: StaticSecret,
    public: [u8; 32],
}

impl std::fmt::Debug for X25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X25519KeyPair")
            .field("public", &hex::encode(self.public))
            .finish()
    }
}

impl X25519KeyPair {
    /// Generates a random key pair.
    pub fn generate() -> Self {
        Self::from_bytes(*SymmetricKey::generate().as_bytes())
    }

    /// Restores a key pair from its secret bytes.
    pub fn from_bytes(secret: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret).to_bytes();
        X25519KeyPair { secret, public }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Computes the shared secret with a peer's public key.
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> [u8; 32] {
        self.secret
            .diffie_hellman(&PublicKey::from(*their_public))
            .to_bytes()
    }
}

/// Long-term keys derived from a device's 32-byte secret seed.
///
/// The same seed always yields the same keys, so a device whose storage was
/// wiped can be recreated with an unchanged identity.
pub struct SeedKeys;

impl SeedKeys {
    /// Secret of the X25519 identity key used for session agreement.
    pub fn identity_secret(seed: &[u8; 32]) -> [u8; 32] {
        HKDF::derive_key(None, seed, IDENTITY_KEY_INFO)
    }

    /// Seed of the Ed25519 key used to sign tokens.
    pub fn signing_seed(seed: &[u8; 32]) -> [u8; 32] {
        HKDF::derive_key(None, seed, SIGNING_SEED_INFO)
    }

    /// Key used to encrypt pickles at rest.
    pub fn storage_key(seed: &[u8; 32]) -> SymmetricKey {
        SymmetricKey::from_bytes(HKDF::derive_key(None, seed, STORAGE_KEY_INFO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diffie_hellman_agrees() {
        let alice = X25519KeyPair::generate();
        let bob = X25519KeyPair::generate();
        assert_eq!(
            alice.diffie_hellman(bob.public_key()),
            bob.diffie_hellman(alice.public_key())
        );
    }

    #[test]
    fn test_restore_from_bytes_keeps_public_key() {
        let pair = X25519KeyPair::generate();
        let restored = X25519KeyPair::from_bytes(pair.secret_bytes());
        assert_eq!(pair.public_key(), restored.public_key());
    }

    #[test]
    fn test_seed_keys_are_independent() {
        let seed = [7u8; 32];
        assert_ne!(SeedKeys::identity_secret(&seed), SeedKeys::signing_seed(&seed));
        assert_ne!(
            SeedKeys::identity_secret(&seed),
            *SeedKeys::storage_key(&seed).as_bytes()
        );
    }
}
