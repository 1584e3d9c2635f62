// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded access database backed by redb.
//!
//! Every state transition of a viewer session is a single write
//! transaction: the session row, the active-session pointer and the audit
//! entries describing the transition commit together or not at all.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use redb::backends::InMemoryBackend;
use redb::{
    Database, MultimapTable, MultimapTableDefinition, ReadableDatabase, ReadableMultimapTable,
    ReadableTable, Table, TableDefinition,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::audit::{key_sequence, AuditAction, AuditLogEntry};
use super::{pair_key, StoreResult};
use crate::grants::{GrantRecord, GrantStatus};

// =============================================================================
// Table Definitions
// =============================================================================

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("viewer_sessions");

const PAIR_SESSIONS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("pair_sessions");

const ACTIVE_SESSIONS: TableDefinition<&str, &str> = TableDefinition::new("active_sessions");

const GRANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("grants");

const AUDIT_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");

const SESSION_AUDIT: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("session_audit");

// =============================================================================
// Records
// =============================================================================

/// Why a session stopped being active.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Closed,
    IdleTimeout,
    Superseded,
}

/// Server-side record of one reading session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerSession {
    pub session_id: String,
    pub user_id: String,
    pub resource_id: String,
    /// Random per-session secret. Never returned to clients.
    pub session_secret: String,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Expiry of the most recently issued viewer token.
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub pages_viewed: u32,
    pub duration_seconds: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Incremented on every token rotation; only the token carrying the
    /// current count is accepted.
    pub rotation_count: u32,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_reason: Option<SessionEndReason>,
}

impl ViewerSession {
    /// Record activity at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
        self.duration_seconds = (now - self.started_at).num_seconds().max(0);
    }

    /// Deactivate the session.
    pub fn end(&mut self, now: DateTime<Utc>, reason: SessionEndReason) {
        self.is_active = false;
        self.ended_at = Some(now);
        self.end_reason = Some(reason);
        self.duration_seconds = (now - self.started_at).num_seconds().max(0);
    }

    pub fn is_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> bool {
        now - self.last_active_at > max_idle
    }
}

/// Result of a closure run against a session inside a write transaction.
#[derive(Debug)]
pub struct SessionMutation<R> {
    /// Write the (possibly modified) session back.
    pub persist: bool,
    pub audit: Vec<AuditLogEntry>,
    pub outcome: R,
}

impl<R> SessionMutation<R> {
    /// Leave the session row untouched.
    pub fn unchanged(outcome: R) -> Self {
        Self {
            persist: false,
            audit: Vec::new(),
            outcome,
        }
    }

    /// Persist the modified session row.
    pub fn persist(outcome: R) -> Self {
        Self {
            persist: true,
            audit: Vec::new(),
            outcome,
        }
    }

    pub fn with_audit(mut self, entry: AuditLogEntry) -> Self {
        self.audit.push(entry);
        self
    }
}

// =============================================================================
// Table helpers
// =============================================================================

fn read_session(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    session_id: &str,
) -> StoreResult<Option<ViewerSession>> {
    let session = match table.get(session_id)? {
        Some(value) => Some(serde_json::from_slice(value.value())?),
        None => None,
    };
    Ok(session)
}

fn write_session(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    session: &ViewerSession,
) -> StoreResult<()> {
    let json = serde_json::to_vec(session)?;
    table.insert(session.session_id.as_str(), json.as_slice())?;
    Ok(())
}

fn write_audit(
    log: &mut Table<'_, &'static str, &'static [u8]>,
    index: &mut MultimapTable<'_, &'static str, &'static str>,
    entry: &AuditLogEntry,
) -> StoreResult<()> {
    // Entries sharing a millisecond keep their write order, across
    // transactions too: continue after the last key of that millisecond.
    let prefix = entry.millis_prefix();
    let upper = format!("{}.", prefix.trim_end_matches('-'));
    let seq = match log.range(prefix.as_str()..upper.as_str())?.next_back() {
        Some(item) => {
            let (last, _) = item?;
            key_sequence(last.value()).map_or(0, |seq| seq + 1)
        }
        None => 0,
    };
    let key = entry.storage_key(seq);
    let json = serde_json::to_vec(entry)?;
    log.insert(key.as_str(), json.as_slice())?;
    if let Some(session_id) = &entry.session_id {
        index.insert(session_id.as_str(), key.as_str())?;
    }
    Ok(())
}

/// Drop the active pointer for the session's pair if it points at it.
fn clear_active(
    active: &mut Table<'_, &'static str, &'static str>,
    session: &ViewerSession,
) -> StoreResult<()> {
    let pair = pair_key(&session.user_id, &session.resource_id);
    let points_here = match active.get(pair.as_str())? {
        Some(value) => value.value() == session.session_id,
        None => false,
    };
    if points_here {
        active.remove(pair.as_str())?;
    }
    Ok(())
}

// =============================================================================
// AccessDatabase
// =============================================================================

/// Sessions, grants and the audit log.
pub struct AccessDatabase {
    db: Database,
}

impl AccessDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Volatile database for tests and tooling.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StoreResult<Self> {
        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_multimap_table(PAIR_SESSIONS)?;
            let _ = write_txn.open_table(ACTIVE_SESSIONS)?;
            let _ = write_txn.open_table(GRANTS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
            let _ = write_txn.open_multimap_table(SESSION_AUDIT)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Deactivate every active session of the new session's pair, then
    /// insert the new one as the active session, in one transaction.
    ///
    /// Returns the sessions that were superseded.
    pub fn activate(
        &self,
        session: &ViewerSession,
        open_entry: &AuditLogEntry,
    ) -> StoreResult<Vec<ViewerSession>> {
        let pair = pair_key(&session.user_id, &session.resource_id);
        let now = session.started_at;

        let write_txn = self.db.begin_write()?;
        let superseded = {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut pairs = write_txn.open_multimap_table(PAIR_SESSIONS)?;
            let mut active = write_txn.open_table(ACTIVE_SESSIONS)?;
            let mut audit = write_txn.open_table(AUDIT_LOG)?;
            let mut session_audit = write_txn.open_multimap_table(SESSION_AUDIT)?;

            let mut known_ids = Vec::new();
            for id in pairs.get(pair.as_str())? {
                known_ids.push(id?.value().to_string());
            }

            let mut superseded = Vec::new();
            for id in known_ids {
                let Some(mut previous) = read_session(&sessions, &id)? else {
                    continue;
                };
                if !previous.is_active {
                    continue;
                }
                previous.end(now, SessionEndReason::Superseded);
                write_session(&mut sessions, &previous)?;

                let entry = AuditLogEntry::for_session(AuditAction::Close, &previous, now)
                    .with_context(json!({
                        "reason": "superseded",
                        "superseded_by": session.session_id,
                    }));
                write_audit(&mut audit, &mut session_audit, &entry)?;
                superseded.push(previous);
            }

            write_session(&mut sessions, session)?;
            pairs.insert(pair.as_str(), session.session_id.as_str())?;
            active.insert(pair.as_str(), session.session_id.as_str())?;
            write_audit(&mut audit, &mut session_audit, open_entry)?;
            superseded
        };
        write_txn.commit()?;
        Ok(superseded)
    }

    /// Run `f` against the stored session inside a write transaction.
    ///
    /// The session is re-read under the writer lock, so concurrent
    /// rotations, closes and idle expiries observe each other. Returns
    /// `None` when no such session exists.
    pub fn mutate_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ViewerSession) -> SessionMutation<R>,
    ) -> StoreResult<Option<R>> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut active = write_txn.open_table(ACTIVE_SESSIONS)?;
            let mut audit = write_txn.open_table(AUDIT_LOG)?;
            let mut session_audit = write_txn.open_multimap_table(SESSION_AUDIT)?;

            match read_session(&sessions, session_id)? {
                None => None,
                Some(mut session) => {
                    let mutation = f(&mut session);
                    if mutation.persist {
                        write_session(&mut sessions, &session)?;
                        if !session.is_active {
                            clear_active(&mut active, &session)?;
                        }
                    }
                    for entry in &mutation.audit {
                        write_audit(&mut audit, &mut session_audit, entry)?;
                    }
                    Some(mutation.outcome)
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    pub fn get_session(&self, session_id: &str) -> StoreResult<Option<ViewerSession>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        let session = read_session(&table, session_id)?;
        Ok(session)
    }

    /// The active session for a pair, if any.
    pub fn active_session(
        &self,
        user_id: &str,
        resource_id: &str,
    ) -> StoreResult<Option<ViewerSession>> {
        let pair = pair_key(user_id, resource_id);
        let read_txn = self.db.begin_read()?;
        let active = read_txn.open_table(ACTIVE_SESSIONS)?;
        let sessions = read_txn.open_table(SESSIONS)?;

        let session_id = match active.get(pair.as_str())? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let session = read_session(&sessions, &session_id)?;
        Ok(session)
    }

    /// Every session ever opened for a pair.
    pub fn sessions_for_pair(
        &self,
        user_id: &str,
        resource_id: &str,
    ) -> StoreResult<Vec<ViewerSession>> {
        let pair = pair_key(user_id, resource_id);
        let read_txn = self.db.begin_read()?;
        let pairs = read_txn.open_multimap_table(PAIR_SESSIONS)?;
        let sessions = read_txn.open_table(SESSIONS)?;

        let mut out = Vec::new();
        for id in pairs.get(pair.as_str())? {
            let id = id?;
            if let Some(session) = read_session(&sessions, id.value())? {
                out.push(session);
            }
        }
        out.sort_by_key(|s| s.started_at);
        Ok(out)
    }

    // =========================================================================
    // Audit log
    // =========================================================================

    /// Append audit entries that are not tied to a session transition.
    pub fn append_audit(&self, entries: &[AuditLogEntry]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut audit = write_txn.open_table(AUDIT_LOG)?;
            let mut session_audit = write_txn.open_multimap_table(SESSION_AUDIT)?;
            for entry in entries {
                write_audit(&mut audit, &mut session_audit, entry)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Audit entries for one session, oldest first.
    pub fn audit_for_session(&self, session_id: &str) -> StoreResult<Vec<AuditLogEntry>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_multimap_table(SESSION_AUDIT)?;
        let log = read_txn.open_table(AUDIT_LOG)?;

        let mut keys = Vec::new();
        for key in index.get(session_id)? {
            keys.push(key?.value().to_string());
        }
        keys.sort();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = log.get(key.as_str())? {
                entries.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(entries)
    }

    /// Entire audit log, oldest first.
    pub fn audit_entries(&self) -> StoreResult<Vec<AuditLogEntry>> {
        let read_txn = self.db.begin_read()?;
        let log = read_txn.open_table(AUDIT_LOG)?;

        let mut entries = Vec::new();
        for item in log.iter()? {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    // =========================================================================
    // Grants
    // =========================================================================

    /// Insert or replace a grant record.
    pub fn upsert_grant(&self, grant: &GrantRecord) -> StoreResult<()> {
        let pair = pair_key(&grant.user_id, &grant.resource_id);
        let json = serde_json::to_vec(grant)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(GRANTS)?;
            table.insert(pair.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Mark a grant refunded. Returns false when no grant exists.
    pub fn revoke_grant(&self, user_id: &str, resource_id: &str) -> StoreResult<bool> {
        let pair = pair_key(user_id, resource_id);
        let write_txn = self.db.begin_write()?;
        let revoked = {
            let mut table = write_txn.open_table(GRANTS)?;
            let existing: Option<GrantRecord> = match table.get(pair.as_str())? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            match existing {
                Some(mut grant) => {
                    grant.status = GrantStatus::Refunded;
                    let json = serde_json::to_vec(&grant)?;
                    table.insert(pair.as_str(), json.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(revoked)
    }

    pub fn get_grant(&self, user_id: &str, resource_id: &str) -> StoreResult<Option<GrantRecord>> {
        let pair = pair_key(user_id, resource_id);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GRANTS)?;
        let grant = match table.get(pair.as_str())? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(grant)
    }
}
