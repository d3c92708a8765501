// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Passphrase-encrypted snapshots of engine state.

use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroize;

use super::EngineError;
use crate::crypto::{decrypt, encrypt, SymmetricKey};

pub(crate) fn seal<T: Serialize>(key: &SymmetricKey, value: &T) -> Result<Vec<u8>, EngineError> {
    let mut json = serde_json::to_vec(value).map_err(|e| EngineError::Pickle(e.to_string()))?;
    let sealed = encrypt(key, &json).map_err(|e| EngineError::Pickle(e.to_string()));
    json.zeroize();
    sealed
}

pub(crate) fn open<T: DeserializeOwned>(key: &SymmetricKey, pickle: &[u8]) -> Result<T, EngineError> {
    let mut json = decrypt(key, pickle).map_err(|e| EngineError::Pickle(e.to_string()))?;
    let value = serde_json::from_slice(&json).map_err(|e| EngineError::Pickle(e.to_string()));
    json.zeroize();
    value
}
