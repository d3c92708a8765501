// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Client Error Types
//!
//! Unified error type for the messaging client.

use thiserror::Error;

use crate::crypto::{SigningError, TokenError};
use crate::network::NetworkError;
use crate::storage::StoreError;

/// Unified error type for client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Session store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Transport operation failed.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Token issuing or verification failed.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Deriving the signing key failed.
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// Invalid builder input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Content could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A request with this conversation id is already waiting.
    #[error("request already pending: {0}")]
    DuplicateRequest(String),

    /// No response arrived before the deadline.
    #[error("request timed out")]
    RequestTimeout,

    /// The client has been closed.
    #[error("client closed")]
    Closed,
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
