// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! This module defines the request and response data structures used by
//! the REST API. All types derive `Serialize`, `Deserialize`, and `ToSchema`
//! for automatic JSON handling and OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Sessions**: opening, refreshing and closing viewer sessions
//! - **Offline**: offline token issuance and the watermark payload
//! - **Audit**: audit log listings
//!
//! Reconcile request and response types live in [`crate::sync::protocol`]
//! because the client agent shares them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::grants::GrantRecord;
use crate::storage::AuditLogEntry;

/// Header carrying the viewer token on document and session requests.
pub const VIEWER_TOKEN_HEADER: &str = "x-viewer-token";

// =============================================================================
// Watermark
// =============================================================================

/// Identifying information composited onto every rendered page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct WatermarkPayload {
    pub user_email: String,
    pub purchase_date: DateTime<Utc>,
    pub resource_title: String,
}

impl From<&GrantRecord> for WatermarkPayload {
    fn from(grant: &GrantRecord) -> Self {
        Self {
            user_email: grant.user_email.clone(),
            purchase_date: grant.purchased_at,
            resource_title: grant.resource_title.clone(),
        }
    }
}

// =============================================================================
// Session Models
// =============================================================================

/// Request to open a viewer session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OpenSessionRequest {
    pub resource_id: String,
}

/// A freshly issued viewer token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionTokenResponse {
    pub session_id: String,
    pub resource_id: String,
    /// Present the token in the `X-Viewer-Token` header.
    pub viewer_token: String,
    pub expires_at: DateTime<Utc>,
    pub rotation_count: u32,
}

/// Result of a heartbeat, page view or explicit rotation.
///
/// `viewer_token` is only present when the token was rotated; the client
/// must switch to it immediately because the previous one stops working.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionRefreshResponse {
    pub session_id: String,
    pub rotated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub rotation_count: u32,
    pub pages_viewed: u32,
}

/// Page view notification.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PageViewRequest {
    pub page_number: u32,
}

/// Close request. The token travels in the body so unload beacons work.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CloseSessionRequest {
    pub viewer_token: String,
}

// =============================================================================
// Offline Models
// =============================================================================

/// Signed permission to keep one document offline.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OfflineTokenResponse {
    pub resource_id: String,
    pub offline_token: String,
    pub expires_at: DateTime<Utc>,
    pub watermark: WatermarkPayload,
}

// =============================================================================
// Audit Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionAuditResponse {
    pub session_id: String,
    pub entries: Vec<AuditLogEntry>,
}
