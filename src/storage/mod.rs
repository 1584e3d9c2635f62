// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Server Storage
//!
//! Persistent state for the access server, backed by redb (pure Rust,
//! ACID, single writer).
//!
//! ## Table Layout
//!
//! ```text
//! viewer_sessions   session_id            -> ViewerSession (JSON)
//! pair_sessions     user|resource        =>> session_id      (multimap)
//! active_sessions   user|resource         -> session_id
//! grants            user|resource         -> GrantRecord (JSON)
//! audit_log         {millis:020}-{seq:06}-{uuid} -> AuditLogEntry (JSON)
//! session_audit     session_id           =>> audit key       (multimap)
//! ```
//!
//! Sessions are never physically deleted; deactivation flips `is_active`
//! and removes the `active_sessions` pointer inside the same write
//! transaction.

pub mod access_db;
pub mod audit;

pub use access_db::{AccessDatabase, SessionMutation};
pub use audit::{AuditAction, AuditLogEntry};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Composite key for a (user, resource) pair.
///
/// Uses the ASCII unit separator, which never appears in identifiers.
pub(crate) fn pair_key(user_id: &str, resource_id: &str) -> String {
    format!("{user_id}\u{1f}{resource_id}")
}
