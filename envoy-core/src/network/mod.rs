// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network + Transport Layer
//!
//! Delivers ciphertexts between devices through a relay.
//!
//! # Architecture
//!
//! - **Frames**: wire protocol and length-prefixed JSON codec
//! - **Priority queue**: orders outbound frames, control before application
//! - **Connection seams**: `Connection`, `Dialer` and `Credentials` traits
//! - **WebSocket dialer**: production connections over tungstenite
//! - **Transport**: authenticated, reconnecting connection with resumption
//! - **Memory relay**: in-process relay for tests

mod connection;
mod error;
mod frame;
mod mock;
mod queue;
mod transport;

#[cfg(any(feature = "network-native-tls", feature = "network-rustls"))]
mod websocket;

pub use connection::{Connection, ConnectionState, Credentials, Dialer, TransportResult};
pub use error::NetworkError;
pub use frame::{
    decode_frame, encode_frame, read_frame_length, AuthFrame, Frame, MessageFrame, AUTH_REJECTED,
    FRAME_HEADER_SIZE, KIND_MESSAGE, KIND_SESSION_RECOVERY, MAX_FRAME_SIZE,
};
pub use mock::{MemoryConnection, MemoryRelay, StaticCredentials};
pub use queue::{PriorityQueue, QueueError};
pub use transport::{
    Inbound, SendCallback, Transport, TransportConfig, CLASS_APPLICATION, CLASS_CLOSE,
    CLASS_CONTROL,
};

#[cfg(any(feature = "network-native-tls", feature = "network-rustls"))]
pub use websocket::{WebSocketConnection, WebSocketDialer};
