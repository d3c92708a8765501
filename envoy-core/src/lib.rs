// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Envoy Core Library
//!
//! End-to-end encrypted device messaging with durable ratchet sessions and
//! resumable delivery over a relay.
//! All cryptographic operations use the audited `ring` crate, `x25519-dalek`
//! and `chacha20poly1305`.

pub mod api;
mod clock;
pub mod crypto;
mod encoding;
pub mod engine;
pub mod network;
pub mod pki;
pub mod storage;

pub use api::{Client, ClientBuilder, ClientConfig, ClientError, ClientResult, Content, Message};
pub use crypto::{PublicKey, Signature, SigningKeyPair, SymmetricKey};
pub use engine::{Account, EngineError, GroupMessage, GroupSession, Session, SessionMessage};
pub use network::{ConnectionState, NetworkError, Transport, TransportConfig};
pub use pki::{DeviceAddress, KeyResolver, MemoryKeyResolver, PkiError};
pub use storage::{SessionStore, StoreConfig, StoreError};
