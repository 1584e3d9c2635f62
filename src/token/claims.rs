// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token payloads.
//!
//! Field names on the wire are camelCase and timestamps are Unix
//! milliseconds. Unknown fields are ignored on decode so newer issuers can
//! add fields without breaking older verifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payloads that carry their own expiry.
pub trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;
}

/// Short-lived credential proving an active viewer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerClaims {
    pub user_id: String,
    pub resource_id: String,
    pub session_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    /// Must equal the live session's rotation count for the token to be
    /// accepted.
    pub rotation_count: u32,
}

impl Expiring for ViewerClaims {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Long-lived credential authorizing offline possession of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineClaims {
    pub user_id: String,
    pub resource_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl Expiring for OfflineClaims {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}
