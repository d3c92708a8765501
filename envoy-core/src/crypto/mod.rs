// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod chain;
pub mod encryption;
pub mod kdf;
pub mod keys;
pub mod ratchet;
pub mod signing;
pub mod token;

pub use chain::{ChainError, ChainKey, MessageKey};
pub use encryption::{decrypt, encrypt, EncryptionError, SymmetricKey};
pub use kdf::HKDF;
pub use keys::{SeedKeys, X25519KeyPair};
pub use ratchet::{RatchetError, RatchetHeader, RatchetMessage, RatchetState};
pub use signing::{PublicKey, Signature, SigningError, SigningKeyPair};
pub use token::{Claims, TokenError};
