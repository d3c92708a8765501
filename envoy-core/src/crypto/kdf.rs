// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HKDF-SHA256 key derivation.

use ring::hkdf;

/// Output length marker for `ring::hkdf`.
struct OutputLen(usize);

impl hkdf::KeyType for OutputLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-SHA256 helpers with fixed-size outputs.
pub struct HKDF;

impl HKDF {
    /// Derives a single 32-byte key.
    pub fn derive_key(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        Self::expand(salt, ikm, info, &mut out);
        out
    }

    /// Derives two independent 32-byte keys (e.g. root key and chain key).
    pub fn derive_key_pair(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> ([u8; 32], [u8; 32]) {
        let mut out = [0u8; 64];
        Self::expand(salt, ikm, info, &mut out);

        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        first.copy_from_slice(&out[..32]);
        second.copy_from_slice(&out[32..]);
        zeroize::Zeroize::zeroize(&mut out);
        (first, second)
    }

    fn expand(salt: Option<&[u8]>, ikm: &[u8], info: &[u8], out: &mut [u8]) {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt.unwrap_or(&[]));
        let prk = salt.extract(ikm);
        let info = [info];
        // Outputs are at most 64 bytes, far below the 255 * 32 byte HKDF limit.
        prk.expand(&info, OutputLen(out.len()))
            .and_then(|okm| okm.fill(out))
            .expect("HKDF output length within limits");
    }
}
