// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ratchet engine error types.

use thiserror::Error;

use crate::crypto::{EncryptionError, RatchetError};

/// Errors raised by accounts, sessions and group sessions.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Bad message MAC")]
    BadMessageMac,

    #[error("Bad message format: {0}")]
    BadMessageFormat(String),

    #[error("Unknown one-time key id: {0}")]
    UnknownOneTimeKey(u32),

    #[error("Ratchet error: {0}")]
    Ratchet(RatchetError),

    #[error("No recipient entry for {0}")]
    UnknownRecipient(String),

    #[error("Group session has no participants")]
    NoParticipants,

    #[error("Pickle error: {0}")]
    Pickle(String),
}

impl EngineError {
    /// True for failures meaning the local session no longer matches the
    /// peer's, as opposed to local pickling problems.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            EngineError::BadMessageMac
                | EngineError::BadMessageFormat(_)
                | EngineError::UnknownOneTimeKey(_)
                | EngineError::Ratchet(_)
        )
    }
}

impl From<RatchetError> for EngineError {
    fn from(err: RatchetError) -> Self {
        match err {
            RatchetError::Encryption(EncryptionError::DecryptionFailed) => EngineError::BadMessageMac,
            RatchetError::Encryption(e @ EncryptionError::CiphertextTooShort)
            | RatchetError::Encryption(e @ EncryptionError::UnknownAlgorithm(_)) => {
                EngineError::BadMessageFormat(e.to_string())
            }
            other => EngineError::Ratchet(other),
        }
    }
}
