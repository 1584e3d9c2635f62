// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Claims read from an identity-provider JWT.
///
/// `aud` is validated by `jsonwebtoken` and not read directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject, the canonical user id.
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Authenticated caller, available to handlers through the `Auth` extractor.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Identity token expiry (Unix seconds).
    pub expires_at: i64,
}

impl From<IdentityClaims> for AuthenticatedUser {
    fn from(claims: IdentityClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            expires_at: claims.exp,
        }
    }
}
