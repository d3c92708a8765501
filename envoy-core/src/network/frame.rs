// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Frames
//!
//! Frames are JSON documents behind a 4-byte big-endian length prefix.
//! Binary fields are base64 encoded.

use serde::{Deserialize, Serialize};

use super::error::NetworkError;

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1_048_576;

/// Frame header size (4 bytes length prefix).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Error code of a rejected authentication.
pub const AUTH_REJECTED: u16 = 401;

/// Frame kind of encrypted application messages.
pub const KIND_MESSAGE: &str = "message";
/// Frame kind of session-recovery requests.
pub const KIND_SESSION_RECOVERY: &str = "session.recovery";

/// Authentication sent first on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFrame {
    pub id: String,
    pub device: String,
    pub token: String,
    /// Last offset the device has processed; delivery resumes after it.
    pub offset: u64,
}

/// An addressed ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFrame {
    pub id: String,
    pub kind: String,
    pub sender: String,
    pub recipient: String,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub ciphertext: Vec<u8>,
    pub priority: u8,
    /// Assigned by the relay per recipient; 0 on outbound frames.
    pub offset: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Auth(AuthFrame),
    Message(MessageFrame),
    Ack { id: String },
    Error { id: String, code: u16, message: String },
    Ping { id: String },
    Pong { id: String },
}

impl Frame {
    /// Id correlating a frame with its acknowledgement.
    pub fn id(&self) -> &str {
        match self {
            Frame::Auth(auth) => &auth.id,
            Frame::Message(message) => &message.id,
            Frame::Ack { id }
            | Frame::Error { id, .. }
            | Frame::Ping { id }
            | Frame::Pong { id } => id,
        }
    }
}

/// Serializes a frame with length framing.
///
/// Format: [length: 4 bytes big-endian] [json payload]
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, NetworkError> {
    let json = serde_json::to_vec(frame).map_err(|e| NetworkError::Serialization(e.to_string()))?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(NetworkError::InvalidMessage(format!(
            "Frame too large: {} bytes (max {})",
            json.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + json.len());
    bytes.extend_from_slice(&(json.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Deserializes a length-prefixed frame.
pub fn decode_frame(data: &[u8]) -> Result<Frame, NetworkError> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(NetworkError::InvalidMessage("Frame too short".into()));
    }
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header.copy_from_slice(&data[..FRAME_HEADER_SIZE]);
    let expected = read_frame_length(&header);
    let payload = &data[FRAME_HEADER_SIZE..];

    if expected > MAX_FRAME_SIZE {
        return Err(NetworkError::InvalidMessage(format!(
            "Frame too large: {} bytes (max {})",
            expected, MAX_FRAME_SIZE
        )));
    }
    if payload.len() != expected {
        return Err(NetworkError::InvalidMessage(format!(
            "Length mismatch: expected {}, got {}",
            expected,
            payload.len()
        )));
    }

    serde_json::from_slice(payload).map_err(|e| NetworkError::InvalidMessage(e.to_string()))
}

/// Reads the length prefix from a frame header.
pub fn read_frame_length(header: &[u8; FRAME_HEADER_SIZE]) -> usize {
    u32::from_be_bytes(*header) as usize
}
