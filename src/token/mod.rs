// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Signed Token Codec
//!
//! Compact tokens used for viewer sessions and offline possession.
//!
//! ## Wire Format
//!
//! ```text
//! base64url(JSON payload) "." hex(HMAC-SHA256(base64url payload, secret))
//! ```
//!
//! Verification recomputes the MAC over the *received* encoded payload
//! string, never over re-serialized fields, so payloads with extra fields
//! written by newer issuers keep verifying. The signature comparison is
//! constant-time.
//!
//! Tokens are only ever built by [`TokenSigner::issue`]; call sites must not
//! assemble them from trusted fields.

pub mod claims;
pub mod error;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub use claims::{Expiring, OfflineClaims, ViewerClaims};
pub use error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Issues and verifies signed tokens under one secret.
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Create a signer. Returns `None` when the secret is shorter than
    /// [`MIN_SECRET_LEN`].
    pub fn new(secret: Zeroizing<Vec<u8>>) -> Option<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return None;
        }
        let mac = HmacSha256::new_from_slice(&secret).ok()?;
        Some(Self { mac })
    }

    /// Sign a payload and return the encoded token.
    pub fn issue<T: Serialize>(&self, payload: &T) -> Result<String, TokenError> {
        let json = serde_json::to_vec(payload).map_err(|e| TokenError::Encode(e.to_string()))?;
        let encoded = Base64UrlUnpadded::encode_string(&json);
        let signature = hex::encode(self.tag(encoded.as_bytes()));
        Ok(format!("{encoded}.{signature}"))
    }

    /// Verify signature and expiry, returning the payload.
    pub fn verify<T>(&self, token: &str, now: DateTime<Utc>) -> Result<T, TokenError>
    where
        T: DeserializeOwned + Expiring,
    {
        let (encoded, signature_hex) = split(token)?;

        // Signatures are lowercase hex only.
        if !signature_hex
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(TokenError::BadSignature);
        }
        let supplied = hex::decode(signature_hex).map_err(|_| TokenError::BadSignature)?;
        let expected = self.tag(encoded.as_bytes());
        if !bool::from(expected.as_slice().ct_eq(supplied.as_slice())) {
            return Err(TokenError::BadSignature);
        }

        let claims: T = decode_payload(encoded)?;
        if now >= claims.expires_at() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn tag(&self, data: &[u8]) -> Vec<u8> {
        self.mac
            .clone()
            .chain_update(data)
            .finalize()
            .into_bytes()
            .to_vec()
    }
}

/// Decode a token payload WITHOUT checking its signature.
///
/// Only for holders that do not own the signing secret (the client vault
/// reading the expiry of its own offline token). Never use the result for
/// an authorization decision on the issuing side.
pub fn peek<T: DeserializeOwned>(token: &str) -> Result<T, TokenError> {
    let (encoded, _) = split(token)?;
    decode_payload(encoded)
}

fn split(token: &str) -> Result<(&str, &str), TokenError> {
    match token.split_once('.') {
        Some((encoded, signature)) if !encoded.is_empty() && !signature.is_empty() => {
            Ok((encoded, signature))
        }
        _ => Err(TokenError::Malformed),
    }
}

fn decode_payload<T: DeserializeOwned>(encoded: &str) -> Result<T, TokenError> {
    let json = Base64UrlUnpadded::decode_vec(encoded).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)
}
