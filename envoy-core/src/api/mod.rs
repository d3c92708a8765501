// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Envoy API Layer
//!
//! High-level messaging client over the session store and the resilient
//! transport.
//!
//! # Module Structure
//!
//! - [`error`] - Error types for the API layer
//! - [`config`] - Client configuration
//! - [`message`] - Plaintext content and delivered messages
//! - [`client`] - The client and its builder

pub mod client;
pub mod config;
pub mod error;
pub mod message;

pub use client::{Client, ClientBuilder, Handler};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use message::{Content, Message, WILDCARD};
