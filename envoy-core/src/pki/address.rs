// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::PkiError;

/// A device of an identity, written `identity:device`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub identity: String,
    pub device: String,
}

impl DeviceAddress {
    pub fn new(identity: impl Into<String>, device: impl Into<String>) -> Self {
        DeviceAddress {
            identity: identity.into(),
            device: device.into(),
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.device)
    }
}

impl FromStr for DeviceAddress {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((identity, device))
                if !identity.is_empty() && !device.is_empty() && !device.contains(':') =>
            {
                Ok(DeviceAddress::new(identity, device))
            }
            _ => Err(PkiError::InvalidAddress(s.to_string())),
        }
    }
}
