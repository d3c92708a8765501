// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

/// Key resolution error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PkiError {
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("No published pre-keys for {0}")]
    NoPreKeys(String),

    #[error("Key history is broken at sequence {0}")]
    BrokenHistory(u64),

    #[error("Key publication failed: {0}")]
    PublishFailed(String),
}
