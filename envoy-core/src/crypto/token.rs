// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signed Compact Tokens
//!
//! `base64url(header) . base64url(claims) . base64url(signature)` with an
//! Ed25519 signature over the first two segments. Used for transport
//! authentication and for session-recovery control frames.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::signing::{PublicKey, Signature, SigningKeyPair};

const TOKEN_HEADER: &str = r#"{"alg":"EdDSA","typ":"JWT"}"#;

/// Token error types.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),
    #[error("Token signature is invalid")]
    BadSignature,
    #[error("Token expired at {0}")]
    Expired(i64),
}

/// Claims carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuing identity.
    pub iss: String,
    /// Issuing device.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Id of the delivery this token refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
}

impl Claims {
    /// Creates claims valid for `ttl_secs` from now.
    pub fn new(issuer: &str, device: &str, ttl_secs: i64) -> Self {
        let now = crate::clock::unix_now();
        Claims {
            iss: issuer.to_string(),
            sub: device.to_string(),
            aud: None,
            iat: now,
            exp: now + ttl_secs,
            jti: uuid::Uuid::new_v4().to_string(),
            typ: None,
            rid: None,
        }
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.aud = Some(audience.to_string());
        self
    }

    pub fn with_type(mut self, typ: &str) -> Self {
        self.typ = Some(typ.to_string());
        self
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.rid = Some(reference.to_string());
        self
    }
}

/// Signs `claims` into a compact token.
pub fn issue(signer: &SigningKeyPair, claims: &Claims) -> Result<String, TokenError> {
    let claims_json =
        serde_json::to_vec(claims).map_err(|e| TokenError::Malformed(e.to_string()))?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(TOKEN_HEADER),
        URL_SAFE_NO_PAD.encode(claims_json)
    );
    let signature = signer.sign(signing_input.as_bytes());
    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature.as_bytes())
    ))
}

/// Parses the claims without checking the signature.
///
/// Only for routing decisions such as choosing the key to verify with.
pub fn peek(token: &str) -> Result<Claims, TokenError> {
    let (_, claims, _) = split(token)?;
    decode_claims(claims)
}

/// Verifies the signature and expiry and returns the claims.
pub fn verify(token: &str, key: &PublicKey, now: i64) -> Result<Claims, TokenError> {
    let (header, claims, signature) = split(token)?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    let signature =
        Signature::from_slice(&signature).map_err(|e| TokenError::Malformed(e.to_string()))?;

    let signing_input = format!("{}.{}", header, claims);
    if !key.verify(signing_input.as_bytes(), &signature) {
        return Err(TokenError::BadSignature);
    }

    let claims = decode_claims(claims)?;
    if claims.exp < now {
        return Err(TokenError::Expired(claims.exp));
    }
    Ok(claims)
}

fn split(token: &str) -> Result<(&str, &str, &str), TokenError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(claims), Some(signature), None) => Ok((header, claims, signature)),
        _ => Err(TokenError::Malformed("expected three segments".into())),
    }
}

fn decode_claims(segment: &str) -> Result<Claims, TokenError> {
    let json = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| TokenError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> SigningKeyPair {
        SigningKeyPair::from_seed(&[5u8; 32]).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = signer();
        let claims = Claims::new("alice", "phone", 60)
            .with_type("session.recovery")
            .with_reference("frame-1");
        let token = issue(&signer, &claims).unwrap();

        let verified = verify(&token, &signer.public_key(), claims.iat).unwrap();
        assert_eq!(verified, claims);
        assert_eq!(peek(&token).unwrap().rid.as_deref(), Some("frame-1"));
    }

    #[test]
    fn test_wrong_key_and_expiry() {
        let claims = Claims::new("alice", "phone", 60);
        let token = issue(&signer(), &claims).unwrap();

        let other = SigningKeyPair::from_seed(&[6u8; 32]).unwrap();
        assert!(matches!(
            verify(&token, &other.public_key(), claims.iat),
            Err(TokenError::BadSignature)
        ));
        assert!(matches!(
            verify(&token, &signer().public_key(), claims.exp + 1),
            Err(TokenError::Expired(_))
        ));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(peek("a.b"), Err(TokenError::Malformed(_))));
        assert!(matches!(peek("a.b.c.d"), Err(TokenError::Malformed(_))));
        assert!(matches!(peek("!!.@@.##"), Err(TokenError::Malformed(_))));
    }
}
