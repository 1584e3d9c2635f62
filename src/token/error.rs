// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token verification errors.

use thiserror::Error;

/// Why a signed token was rejected.
///
/// Callers must treat every variant as "no access". The split exists so
/// that forged tokens can be logged as possible tampering while natural
/// expiry is logged routinely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Token does not have the `payload.signature` shape or the payload
    /// cannot be decoded.
    #[error("token is malformed")]
    Malformed,
    /// Signature does not match the payload.
    #[error("token signature is invalid")]
    BadSignature,
    /// Signature is valid but `expiresAt` has passed.
    #[error("token has expired")]
    Expired,
    /// Payload could not be serialized while issuing.
    #[error("failed to encode token payload: {0}")]
    Encode(String),
}

impl TokenError {
    /// Whether this rejection suggests tampering rather than lifecycle.
    pub fn is_tamper(&self) -> bool {
        matches!(self, TokenError::Malformed | TokenError::BadSignature)
    }
}
