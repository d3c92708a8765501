// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Types
//!
//! [`Content`] is the JSON plaintext that travels inside the group
//! ciphertext. [`Message`] is what handlers and request waiters receive.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ClientError;
use crate::pki::DeviceAddress;

/// Subscription type matching every message without a dedicated handler.
pub const WILDCARD: &str = "*";

/// Plaintext payload of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Application-level message type, used for subscription routing.
    pub typ: String,
    /// Conversation id correlating a response with its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default)]
    pub body: Value,
}

impl Content {
    pub fn new(typ: &str, body: Value) -> Self {
        Content {
            typ: typ.to_string(),
            cid: None,
            body,
        }
    }

    pub fn with_cid(mut self, cid: &str) -> Self {
        self.cid = Some(cid.to_string());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ClientError> {
        serde_json::to_vec(self).map_err(|e| ClientError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClientError> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

/// A decrypted inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: DeviceAddress,
    /// Relay frame id.
    pub id: String,
    /// Resumption offset of the frame.
    pub offset: u64,
    pub typ: String,
    pub cid: Option<String>,
    pub body: Value,
    /// Send time reported by the relay, in unix seconds.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_wire_shape() {
        let content = Content::new("chat.message", json!({"text": "hi"})).with_cid("c-1");
        let value: Value = serde_json::from_slice(&content.to_bytes().unwrap()).unwrap();
        assert_eq!(value, json!({"typ": "chat.message", "cid": "c-1", "body": {"text": "hi"}}));
    }

    #[test]
    fn test_content_defaults_and_errors() {
        let content = Content::from_bytes(br#"{"typ":"ping"}"#).unwrap();
        assert_eq!(content.cid, None);
        assert_eq!(content.body, Value::Null);

        assert!(matches!(
            Content::from_bytes(b"not json"),
            Err(ClientError::Serialization(_))
        ));
    }
}
