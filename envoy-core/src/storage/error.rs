// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session store error types.

use thiserror::Error;

use crate::engine::EngineError;
use crate::pki::PkiError;

/// Session store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Key directory error: {0}")]
    Pki(#[from] PkiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Recipient list is empty")]
    InvalidRecipients,

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// The session with `sender` was unusable and has been purged. The peer
    /// has to negotiate a new one.
    #[error("Decryption failed for messages from {sender}")]
    DecryptionFailed { sender: String },

    #[error("Message has no entry for recipient {0}")]
    UnknownRecipient(String),

    #[error("Device has no active key: {0}")]
    InactiveDevice(String),

    #[error("Sender identity key does not match key history: {0}")]
    UntrustedSender(String),

    #[error("No one-time keys published for {0}")]
    NoOneTimeKeys(String),

    #[error("Offset {0} does not fit the database")]
    OffsetOutOfRange(u64),
}
