// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit log entries for viewer sessions.
//!
//! Entries are append-only: this crate writes them and reads them back for
//! review, but never updates or deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::access_db::ViewerSession;

/// What happened to a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Open,
    PageView,
    Close,
    Expired,
    Blocked,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLogEntry {
    /// Unique entry ID.
    pub entry_id: String,
    pub user_id: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub timestamp: DateTime<Utc>,
    /// Free-form details (ip, user agent, reason).
    #[schema(value_type = Option<Object>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl AuditLogEntry {
    pub fn new(
        action: AuditAction,
        user_id: impl Into<String>,
        resource_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            resource_id: resource_id.into(),
            session_id: None,
            action,
            page_number: None,
            timestamp,
            context: None,
        }
    }

    /// Entry attributed to an existing session.
    pub fn for_session(action: AuditAction, session: &ViewerSession, timestamp: DateTime<Utc>) -> Self {
        Self::new(action, &session.user_id, &session.resource_id, timestamp)
            .with_session(&session.session_id)
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_page(mut self, page_number: u32) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Key prefix shared by every entry stamped with the same millisecond.
    pub(crate) fn millis_prefix(&self) -> String {
        let millis = self.timestamp.timestamp_millis().max(0);
        format!("{millis:020}-")
    }

    /// Sortable storage key: zero-padded millis, the write sequence within
    /// that millisecond, then entry id.
    pub(crate) fn storage_key(&self, seq: u32) -> String {
        format!("{}{seq:06}-{}", self.millis_prefix(), self.entry_id)
    }
}

/// Write sequence encoded in a storage key.
pub(crate) fn key_sequence(key: &str) -> Option<u32> {
    key.get(21..27)?.parse().ok()
}
