// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ratchet Engine
//!
//! Accounts, pairwise sessions and group sessions on top of the double
//! ratchet. State is persisted as pickles: JSON snapshots encrypted with a
//! caller-supplied key.

mod account;
mod error;
mod group;
mod pickle;
mod session;

pub use account::{Account, PreKey, MAX_ONE_TIME_KEYS};
pub use error::EngineError;
pub use group::{GroupMessage, GroupSession};
pub use session::{PreKeyMessage, Session, SessionMessage};
