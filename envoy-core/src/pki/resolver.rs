// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key Resolution
//!
//! [`KeyResolver`] is the boundary to the key directory: it serves key
//! histories and hands out published one-time pre-keys.
//! [`MemoryKeyResolver`] keeps everything in process.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use super::{DeviceAddress, KeyAction, KeyHistory, PkiError};
use crate::crypto::{SeedKeys, SigningKeyPair};
use crate::engine::{Account, PreKey};

/// Key directory used to bootstrap sessions.
pub trait KeyResolver: Send + Sync {
    /// Returns the verified key history of an identity.
    fn history(&self, identity: &str) -> Result<KeyHistory, PkiError>;

    /// Consumes one published pre-key of a device.
    fn device_key(&self, address: &DeviceAddress) -> Result<PreKey, PkiError>;

    /// Replaces every published pre-key of a device with `keys`.
    fn set_device_keys(&self, address: &DeviceAddress, keys: Vec<PreKey>) -> Result<(), PkiError>;

    /// Publishes additional pre-keys for a device.
    fn add_device_keys(&self, address: &DeviceAddress, keys: Vec<PreKey>) -> Result<(), PkiError>;

    /// Pre-keys of a device that are still available to peers.
    fn list_device_keys(&self, address: &DeviceAddress) -> Result<Vec<PreKey>, PkiError>;
}

#[derive(Default)]
struct Directory {
    histories: HashMap<String, KeyHistory>,
    pre_keys: HashMap<DeviceAddress, VecDeque<PreKey>>,
    failing_publications: u32,
    publish_attempts: u32,
}

/// In-process key directory.
#[derive(Default)]
pub struct MemoryKeyResolver {
    directory: RwLock<Directory>,
}

impl MemoryKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device key to the identity's history, unless the same key is
    /// already active.
    pub fn register_device(&self, address: &DeviceAddress, identity_key: [u8; 32], signing_key: [u8; 32]) {
        let mut directory = self.directory.write();
        let history = directory
            .histories
            .entry(address.identity.clone())
            .or_insert_with(|| KeyHistory::empty(&address.identity));

        if history
            .active_device(&address.device)
            .is_some_and(|op| op.public_key == identity_key)
        {
            return;
        }
        if let Some(old) = history.active_device(&address.device).cloned() {
            history.append(
                KeyAction::Revoke,
                &address.device,
                old.public_key,
                old.signing_key,
                crate::clock::unix_now(),
            );
        }
        history.append(
            KeyAction::Add,
            &address.device,
            identity_key,
            signing_key,
            crate::clock::unix_now(),
        );
    }

    /// Registers the keys a device derives from its seed.
    pub fn register_seed(&self, address: &DeviceAddress, seed: &[u8; 32]) {
        let identity_key = Account::from_seed(seed).identity_key();
        let signing_key = SigningKeyPair::from_seed(&SeedKeys::signing_seed(seed))
            .map(|pair| *pair.public_key().as_bytes())
            .expect("32-byte seed is always a valid Ed25519 seed");
        self.register_device(address, identity_key, signing_key);
    }

    /// Revokes the active key of a device.
    pub fn revoke_device(&self, address: &DeviceAddress) {
        let mut directory = self.directory.write();
        if let Some(history) = directory.histories.get_mut(&address.identity) {
            if let Some(active) = history.active_device(&address.device).cloned() {
                history.append(
                    KeyAction::Revoke,
                    &address.device,
                    active.public_key,
                    active.signing_key,
                    crate::clock::unix_now(),
                );
            }
        }
        directory.pre_keys.remove(address);
    }

    /// Makes the next `count` publications fail.
    pub fn fail_publications(&self, count: u32) {
        self.directory.write().failing_publications = count;
    }

    /// Number of publication attempts, failed ones included.
    pub fn publish_attempts(&self) -> u32 {
        self.directory.read().publish_attempts
    }

    /// Drops every published pre-key of a device.
    pub fn clear_device_keys(&self, address: &DeviceAddress) {
        self.directory.write().pre_keys.remove(address);
    }

    fn publish(&self, address: &DeviceAddress, keys: Vec<PreKey>, replace: bool) -> Result<(), PkiError> {
        let mut directory = self.directory.write();
        directory.publish_attempts += 1;
        if directory.failing_publications > 0 {
            directory.failing_publications -= 1;
            return Err(PkiError::PublishFailed(address.to_string()));
        }
        let published = directory.pre_keys.entry(address.clone()).or_default();
        if replace {
            published.clear();
        }
        published.extend(keys);
        Ok(())
    }
}

impl KeyResolver for MemoryKeyResolver {
    fn history(&self, identity: &str) -> Result<KeyHistory, PkiError> {
        let directory = self.directory.read();
        let history = directory
            .histories
            .get(identity)
            .ok_or_else(|| PkiError::UnknownIdentity(identity.to_string()))?;
        KeyHistory::new(identity, history.operations().to_vec())
    }

    fn device_key(&self, address: &DeviceAddress) -> Result<PreKey, PkiError> {
        self.directory
            .write()
            .pre_keys
            .get_mut(address)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| PkiError::NoPreKeys(address.to_string()))
    }

    fn set_device_keys(&self, address: &DeviceAddress, keys: Vec<PreKey>) -> Result<(), PkiError> {
        self.publish(address, keys, true)
    }

    fn add_device_keys(&self, address: &DeviceAddress, keys: Vec<PreKey>) -> Result<(), PkiError> {
        self.publish(address, keys, false)
    }

    fn list_device_keys(&self, address: &DeviceAddress) -> Result<Vec<PreKey>, PkiError> {
        Ok(self
            .directory
            .read()
            .pre_keys
            .get(address)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeviceAddress {
        DeviceAddress::new("bob", "phone")
    }

    #[test]
    fn test_device_keys_are_consumed_in_order() {
        let resolver = MemoryKeyResolver::new();
        let keys = vec![
            PreKey { id: 1, public_key: [1u8; 32] },
            PreKey { id: 2, public_key: [2u8; 32] },
        ];
        resolver.set_device_keys(&address(), keys).unwrap();

        assert_eq!(resolver.device_key(&address()).unwrap().id, 1);
        assert_eq!(resolver.list_device_keys(&address()).unwrap().len(), 1);
        assert_eq!(resolver.device_key(&address()).unwrap().id, 2);
        assert!(matches!(resolver.device_key(&address()), Err(PkiError::NoPreKeys(_))));
    }

    #[test]
    fn test_set_replaces_and_add_appends() {
        let resolver = MemoryKeyResolver::new();
        let key = |id: u32| PreKey { id, public_key: [id as u8; 32] };
        resolver.set_device_keys(&address(), vec![key(1), key(2)]).unwrap();
        resolver.add_device_keys(&address(), vec![key(3)]).unwrap();
        assert_eq!(resolver.list_device_keys(&address()).unwrap().len(), 3);

        resolver.set_device_keys(&address(), vec![key(1)]).unwrap();
        assert_eq!(resolver.list_device_keys(&address()).unwrap(), vec![key(1)]);
    }

    #[test]
    fn test_register_is_idempotent_and_rotation_revokes() {
        let resolver = MemoryKeyResolver::new();
        resolver.register_device(&address(), [1u8; 32], [2u8; 32]);
        resolver.register_device(&address(), [1u8; 32], [2u8; 32]);
        assert_eq!(resolver.history("bob").unwrap().operations().len(), 1);

        resolver.register_device(&address(), [3u8; 32], [4u8; 32]);
        let history = resolver.history("bob").unwrap();
        assert_eq!(history.operations().len(), 3);
        assert_eq!(history.active_device("phone").unwrap().public_key, [3u8; 32]);

        resolver.revoke_device(&address());
        assert!(resolver.history("bob").unwrap().active_device("phone").is_none());
    }

    #[test]
    fn test_injected_publication_failures() {
        let resolver = MemoryKeyResolver::new();
        resolver.fail_publications(2);
        assert!(resolver.set_device_keys(&address(), Vec::new()).is_err());
        assert!(resolver.add_device_keys(&address(), Vec::new()).is_err());
        assert!(resolver.add_device_keys(&address(), Vec::new()).is_ok());
        assert_eq!(resolver.publish_attempts(), 3);
    }

    #[test]
    fn test_unknown_identity() {
        assert!(matches!(
            MemoryKeyResolver::new().history("nobody"),
            Err(PkiError::UnknownIdentity(_))
        ));
    }
}
