// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network error types.

use thiserror::Error;

/// Network error types.
///
/// Cloneable so one failure can be handed to every sender waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timed out")]
    Timeout,

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Message receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Relay rejected frame ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Max retries exceeded")]
    MaxRetriesExceeded,

    #[error("Transport closed")]
    Closed,
}

impl NetworkError {
    /// True for failures a reconnect cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, NetworkError::AuthenticationFailed(_))
    }
}
