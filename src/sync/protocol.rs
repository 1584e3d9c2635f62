// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reconcile wire types and the server-side partition.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::grants::{is_valid_resource_id, GrantChecker};
use crate::storage::StoreError;

/// Upper bound on ids accepted in one reconcile call.
pub const MAX_RECONCILE_IDS: usize = 1000;

/// "Of these locally held resources, which may I keep?"
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub resource_ids: Vec<String>,
}

/// Partition of the requested ids. Every requested id appears in exactly
/// one of the two lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ReconcileResponse {
    pub valid: Vec<String>,
    pub revoked: Vec<String>,
}

/// Split `resource_ids` by whether `user_id` still holds a paid grant.
///
/// Duplicates are collapsed, request order is kept. Ids that are not
/// well-formed are reported revoked.
pub fn partition_grants(
    grants: &dyn GrantChecker,
    user_id: &str,
    resource_ids: &[String],
) -> Result<ReconcileResponse, StoreError> {
    let mut seen = HashSet::new();
    let mut response = ReconcileResponse::default();

    for resource_id in resource_ids {
        if !seen.insert(resource_id.as_str()) {
            continue;
        }
        let granted = is_valid_resource_id(resource_id)
            && grants.has_paid_grant(user_id, resource_id)?.is_granted();
        if granted {
            response.valid.push(resource_id.clone());
        } else {
            response.revoked.push(resource_id.clone());
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grants::GrantRecord;
    use crate::storage::AccessDatabase;
    use chrono::Utc;

    #[test]
    fn partitions_request_set() {
        let db = AccessDatabase::in_memory().unwrap();
        db.upsert_grant(&GrantRecord::paid("u1", "a", "u1@example.com", "A", Utc::now()))
            .unwrap();
        db.upsert_grant(&GrantRecord::paid("u1", "b", "u1@example.com", "B", Utc::now()))
            .unwrap();
        db.revoke_grant("u1", "a").unwrap();

        let ids: Vec<String> = ["a", "b", "c", "b", "../x"].iter().map(|s| s.to_string()).collect();
        let response = partition_grants(&db, "u1", &ids).unwrap();
        assert_eq!(response.valid, vec!["b"]);
        assert_eq!(response.revoked, vec!["a", "c", "../x"]);
    }

    #[test]
    fn grants_are_per_user() {
        let db = AccessDatabase::in_memory().unwrap();
        db.upsert_grant(&GrantRecord::paid("u1", "a", "u1@example.com", "A", Utc::now()))
            .unwrap();
        let response = partition_grants(&db, "u2", &["a".to_string()]).unwrap();
        assert_eq!(response.revoked, vec!["a"]);
    }
}
