// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key directory boundary: device addresses, key histories and pre-key
//! resolution.

mod address;
mod error;
mod history;
mod resolver;

pub use address::DeviceAddress;
pub use error::PkiError;
pub use history::{key_id, KeyAction, KeyHistory, KeyOperation};
pub use resolver::{KeyResolver, MemoryKeyResolver};
