// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Collaborator seams: the commerce grant directory and the document byte
//! source.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AccessError;
use crate::storage::{AccessDatabase, StoreError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Paid,
    Refunded,
}

/// Authoritative record that a user bought a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantRecord {
    pub user_id: String,
    pub resource_id: String,
    pub status: GrantStatus,
    pub user_email: String,
    pub resource_title: String,
    pub purchased_at: DateTime<Utc>,
}

impl GrantRecord {
    pub fn paid(
        user_id: impl Into<String>,
        resource_id: impl Into<String>,
        user_email: impl Into<String>,
        resource_title: impl Into<String>,
        purchased_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            resource_id: resource_id.into(),
            status: GrantStatus::Paid,
            user_email: user_email.into(),
            resource_title: resource_title.into(),
            purchased_at,
        }
    }
}

/// Answer of a grant lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantDecision {
    Granted(GrantRecord),
    Denied(String),
}

impl GrantDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, GrantDecision::Granted(_))
    }
}

/// "Does this user currently hold a paid, non-revoked grant for this
/// resource?"
pub trait GrantChecker: Send + Sync {
    fn has_paid_grant(&self, user_id: &str, resource_id: &str)
        -> Result<GrantDecision, StoreError>;
}

impl GrantChecker for AccessDatabase {
    fn has_paid_grant(
        &self,
        user_id: &str,
        resource_id: &str,
    ) -> Result<GrantDecision, StoreError> {
        let decision = match self.get_grant(user_id, resource_id)? {
            Some(grant) if grant.status == GrantStatus::Paid => GrantDecision::Granted(grant),
            Some(_) => GrantDecision::Denied("purchase was refunded".to_string()),
            None => GrantDecision::Denied("no purchase on record".to_string()),
        };
        Ok(decision)
    }
}

/// Load grants from a JSON array file into the database.
pub fn seed_grants(db: &AccessDatabase, path: &Path) -> Result<usize, StoreError> {
    let raw = std::fs::read(path)?;
    let grants: Vec<GrantRecord> = serde_json::from_slice(&raw)?;
    for grant in &grants {
        db.upsert_grant(grant)?;
    }
    Ok(grants.len())
}

// =============================================================================
// Document bytes
// =============================================================================

/// Source of protected document bytes.
pub trait ResourceSource: Send + Sync {
    fn fetch_resource_bytes(&self, resource_id: &str) -> Result<Vec<u8>, AccessError>;
}

/// Serves `{root}/{resource_id}` from the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryResourceSource {
    root: PathBuf,
}

impl DirectoryResourceSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Resource ids are opaque but must be safe as a single path component.
pub fn is_valid_resource_id(resource_id: &str) -> bool {
    !resource_id.is_empty()
        && resource_id.len() <= 128
        && resource_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !resource_id.starts_with('.')
}

impl ResourceSource for DirectoryResourceSource {
    fn fetch_resource_bytes(&self, resource_id: &str) -> Result<Vec<u8>, AccessError> {
        if !is_valid_resource_id(resource_id) {
            return Err(AccessError::NotFound);
        }
        match std::fs::read(self.root.join(resource_id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AccessError::NotFound),
            Err(e) => Err(AccessError::Storage(StoreError::Io(e))),
        }
    }
}
