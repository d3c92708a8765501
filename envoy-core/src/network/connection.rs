// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Seams
//!
//! The resilient transport talks to the relay only through these traits, so
//! the socket implementation can be swapped (WebSocket in production, an
//! in-memory relay in tests).

use std::sync::Arc;

use super::error::NetworkError;
use super::frame::Frame;
use super::transport::TransportConfig;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, NetworkError>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to any relay.
    Disconnected,
    /// Dialing or authenticating.
    Connecting,
    /// Authenticated and ready.
    Connected,
    /// Shutting down.
    Closing,
}

/// One live, framed connection to the relay.
///
/// Shared between the reader and the writer, hence `&self` everywhere.
pub trait Connection: Send + Sync {
    /// Sends one frame.
    fn send(&self, frame: &Frame) -> TransportResult<()>;

    /// Waits up to the poll interval for the next frame. `Ok(None)` means
    /// nothing arrived in time. [`NetworkError::InvalidMessage`] reports one
    /// undecodable frame; the connection stays usable.
    fn receive(&self) -> TransportResult<Option<Frame>>;

    /// Closes the connection. Safe to call more than once.
    fn close(&self);
}

/// Opens connections to the relay.
pub trait Dialer: Send + Sync {
    fn dial(&self, config: &TransportConfig) -> TransportResult<Arc<dyn Connection>>;
}

/// Supplies what the authentication frame needs, fresh on every
/// (re)connect.
pub trait Credentials: Send + Sync {
    /// Signed token proving control of the device.
    fn token(&self) -> TransportResult<String>;

    /// Offset of the last processed delivery.
    fn offset(&self) -> TransportResult<u64>;
}
