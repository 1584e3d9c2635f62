// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Viewer Session Manager
//!
//! Server-side state machine for reading sessions, one per (user, resource)
//! pair:
//!
//! ```text
//! NoSession --open--> Active --page view / heartbeat--> Active
//!                       |  \--idle > max_idle (seen at validation)--> Expired
//!                       \--close / superseded--> Closed
//! ```
//!
//! Every decision is a function of the persisted [`ViewerSession`] row,
//! re-read inside a write transaction. There are no background timers:
//! idle expiry is detected when a token is presented, and rotation happens
//! when a heartbeat or page view arrives with a token older than the
//! rotation interval.
//!
//! The grant is checked when a session is opened and when an offline token
//! is issued, not on every page view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SessionPolicy;
use crate::crypto;
use crate::error::{AccessError, SECURITY_LOG_TARGET};
use crate::grants::{GrantChecker, GrantDecision, GrantRecord};
use crate::models::WatermarkPayload;
use crate::storage::access_db::{SessionEndReason, ViewerSession};
use crate::storage::{AccessDatabase, AuditAction, AuditLogEntry, SessionMutation};
use crate::token::{OfflineClaims, TokenSigner, ViewerClaims};

/// Connection details recorded on the session and its audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A signed viewer token together with its decoded claims.
#[derive(Debug, Clone)]
pub struct IssuedViewerToken {
    pub token: String,
    pub claims: ViewerClaims,
}

#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub session: ViewerSession,
    pub viewer_token: IssuedViewerToken,
    /// Sessions of the same pair deactivated by this open.
    pub superseded: Vec<String>,
}

/// Outcome of a heartbeat, page view or rotation.
#[derive(Debug, Clone)]
pub struct SessionRefresh {
    pub session_id: String,
    /// Claims of the token the client must use from now on.
    pub claims: ViewerClaims,
    /// Set when a new token replaced the presented one.
    pub rotated: Option<String>,
    pub pages_viewed: u32,
}

/// Signed offline possession token plus the watermark to render with.
#[derive(Debug, Clone)]
pub struct OfflineGrant {
    pub token: String,
    pub claims: OfflineClaims,
    pub watermark: WatermarkPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    Heartbeat,
    PageView(u32),
    ForceRotate,
}

pub struct SessionManager {
    db: Arc<AccessDatabase>,
    signer: TokenSigner,
    grants: Arc<dyn GrantChecker>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(
        db: Arc<AccessDatabase>,
        signer: TokenSigner,
        grants: Arc<dyn GrantChecker>,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            db,
            signer,
            grants,
            clock,
            policy,
        }
    }

    pub fn database(&self) -> &AccessDatabase {
        &self.db
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Open a session, deactivating any other session of the same pair.
    pub fn open(
        &self,
        user_id: &str,
        resource_id: &str,
        client: &ClientInfo,
    ) -> Result<OpenedSession, AccessError> {
        self.require_grant(user_id, resource_id, None)?;

        let now = self.clock.now();
        let session_id = Uuid::new_v4().to_string();
        let claims = ViewerClaims {
            user_id: user_id.to_string(),
            resource_id: resource_id.to_string(),
            session_id: session_id.clone(),
            issued_at: now,
            expires_at: now + self.policy.viewer_token_ttl,
            rotation_count: 0,
        };
        let token = self.signer.issue(&claims)?;

        let session = ViewerSession {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            resource_id: resource_id.to_string(),
            session_secret: crypto::random_hex(32),
            started_at: now,
            last_active_at: now,
            expires_at: claims.expires_at,
            is_active: true,
            pages_viewed: 0,
            duration_seconds: 0,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            rotation_count: 0,
            ended_at: None,
            end_reason: None,
        };

        let open_entry = AuditLogEntry::for_session(AuditAction::Open, &session, now).with_context(
            json!({ "ip": client.ip_address, "user_agent": client.user_agent }),
        );
        let superseded = self.db.activate(&session, &open_entry)?;

        let superseded: Vec<String> = superseded.into_iter().map(|s| s.session_id).collect();
        info!(
            session_id = %session_id,
            user_id = %user_id,
            resource_id = %resource_id,
            superseded = superseded.len(),
            "Viewer session opened"
        );

        Ok(OpenedSession {
            session,
            viewer_token: IssuedViewerToken { token, claims },
            superseded,
        })
    }

    // =========================================================================
    // Validation and refresh
    // =========================================================================

    /// Check that `token` belongs to `user_id` and to a live, non-idle
    /// session at its current rotation. Does not count as activity.
    pub fn validate(&self, user_id: &str, token: &str) -> Result<ViewerClaims, AccessError> {
        self.with_live_session(user_id, token, |_, claims, _| {
            Ok(SessionMutation::unchanged(claims.clone()))
        })
    }

    /// Keep-alive. Rotates the token once it is older than the rotation
    /// interval.
    pub fn heartbeat(&self, user_id: &str, token: &str) -> Result<SessionRefresh, AccessError> {
        self.refresh(user_id, token, Refresh::Heartbeat)
    }

    /// Record a page view. Rotates like [`SessionManager::heartbeat`].
    pub fn page_view(
        &self,
        user_id: &str,
        token: &str,
        page_number: u32,
    ) -> Result<SessionRefresh, AccessError> {
        self.refresh(user_id, token, Refresh::PageView(page_number))
    }

    /// Reissue the token with an incremented rotation count regardless of
    /// its age.
    pub fn rotate(&self, user_id: &str, token: &str) -> Result<SessionRefresh, AccessError> {
        self.refresh(user_id, token, Refresh::ForceRotate)
    }

    fn refresh(
        &self,
        user_id: &str,
        token: &str,
        kind: Refresh,
    ) -> Result<SessionRefresh, AccessError> {
        let policy = self.policy;
        let signer = &self.signer;

        let refresh = self.with_live_session(user_id, token, |session, claims, now| {
            session.touch(now);

            let mut mutation_audit = None;
            if let Refresh::PageView(page) = kind {
                session.pages_viewed = session.pages_viewed.saturating_add(1);
                mutation_audit = Some(
                    AuditLogEntry::for_session(AuditAction::PageView, session, now).with_page(page),
                );
            }

            let due = now - claims.issued_at >= policy.rotation_interval;
            let (current, rotated) = if kind == Refresh::ForceRotate || due {
                let next = ViewerClaims {
                    issued_at: now,
                    expires_at: now + policy.viewer_token_ttl,
                    rotation_count: session.rotation_count.saturating_add(1),
                    ..claims.clone()
                };
                let token = signer.issue(&next)?;
                session.rotation_count = next.rotation_count;
                session.expires_at = next.expires_at;
                (next, Some(token))
            } else {
                (claims.clone(), None)
            };

            let outcome = SessionRefresh {
                session_id: session.session_id.clone(),
                claims: current,
                rotated,
                pages_viewed: session.pages_viewed,
            };
            let mut mutation = SessionMutation::persist(outcome);
            if let Some(entry) = mutation_audit {
                mutation = mutation.with_audit(entry);
            }
            Ok(mutation)
        })?;

        if refresh.rotated.is_some() {
            info!(
                session_id = %refresh.session_id,
                rotation_count = refresh.claims.rotation_count,
                "Viewer token rotated"
            );
        }
        Ok(refresh)
    }

    /// Verify the token, then run `action` on its session inside a write
    /// transaction once the session is known to be live.
    fn with_live_session<R>(
        &self,
        user_id: &str,
        token: &str,
        action: impl FnOnce(
            &mut ViewerSession,
            &ViewerClaims,
            DateTime<Utc>,
        ) -> Result<SessionMutation<R>, AccessError>,
    ) -> Result<R, AccessError> {
        let claims = self.verify_claims(token)?;
        if claims.user_id != user_id {
            return Err(AccessError::Mismatch);
        }
        let now = self.clock.now();
        let max_idle = self.policy.max_idle;

        let result = self.db.mutate_session(&claims.session_id, |session| {
            if !session.is_active {
                return SessionMutation::unchanged(Err(AccessError::Expired)).with_audit(
                    AuditLogEntry::for_session(AuditAction::Blocked, session, now)
                        .with_context(json!({ "reason": "session_inactive" })),
                );
            }
            if session.is_idle(now, max_idle) {
                let idle_seconds = (now - session.last_active_at).num_seconds();
                session.end(now, SessionEndReason::IdleTimeout);
                return SessionMutation::persist(Err(AccessError::IdleTimeout)).with_audit(
                    AuditLogEntry::for_session(AuditAction::Expired, session, now)
                        .with_context(json!({ "reason": "idle_timeout", "idle_seconds": idle_seconds })),
                );
            }
            if claims.rotation_count != session.rotation_count {
                return SessionMutation::unchanged(Err(AccessError::Expired)).with_audit(
                    AuditLogEntry::for_session(AuditAction::Blocked, session, now).with_context(
                        json!({
                            "reason": "stale_rotation",
                            "presented": claims.rotation_count,
                            "current": session.rotation_count,
                        }),
                    ),
                );
            }

            match action(session, &claims, now) {
                Ok(mutation) => SessionMutation {
                    persist: mutation.persist,
                    audit: mutation.audit,
                    outcome: Ok(mutation.outcome),
                },
                Err(e) => SessionMutation::unchanged(Err(e)),
            }
        })?;

        match result {
            Some(outcome) => {
                if let Err(e) = &outcome {
                    debug!(session_id = %claims.session_id, error = %e, "Viewer session rejected");
                }
                outcome
            }
            None => Err(AccessError::NotFound),
        }
    }

    fn verify_claims(&self, token: &str) -> Result<ViewerClaims, AccessError> {
        self.signer
            .verify::<ViewerClaims>(token, self.clock.now())
            .map_err(|e| {
                if e.is_tamper() {
                    warn!(target: SECURITY_LOG_TARGET, error = %e, "Rejected viewer token");
                } else {
                    debug!(error = %e, "Viewer token not accepted");
                }
                AccessError::from(e)
            })
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close the session the token belongs to.
    ///
    /// The signed token is the only credential: unload beacons cannot carry
    /// an identity header. Returns `Ok(false)` when there was nothing to
    /// close (expired or stale token, session already inactive). Only
    /// tampered tokens are errors.
    pub fn close(&self, token: &str) -> Result<bool, AccessError> {
        let claims = match self.verify_claims(token) {
            Ok(claims) => claims,
            Err(AccessError::Expired) => return Ok(false),
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        let max_idle = self.policy.max_idle;
        let closed = self.db.mutate_session(&claims.session_id, |session| {
            if !session.is_active || session.rotation_count != claims.rotation_count {
                return SessionMutation::unchanged(false);
            }
            if session.is_idle(now, max_idle) {
                session.end(now, SessionEndReason::IdleTimeout);
                return SessionMutation::persist(false).with_audit(
                    AuditLogEntry::for_session(AuditAction::Expired, session, now)
                        .with_context(json!({ "reason": "idle_timeout" })),
                );
            }
            session.end(now, SessionEndReason::Closed);
            let entry = AuditLogEntry::for_session(AuditAction::Close, session, now).with_context(
                json!({
                    "duration_seconds": session.duration_seconds,
                    "pages_viewed": session.pages_viewed,
                }),
            );
            SessionMutation::persist(true).with_audit(entry)
        })?;

        let closed = closed.unwrap_or(false);
        if closed {
            info!(session_id = %claims.session_id, "Viewer session closed");
        }
        Ok(closed)
    }

    // =========================================================================
    // Offline tokens
    // =========================================================================

    /// Issue an offline possession token for the resource of a live viewer
    /// session, re-checking the grant first.
    pub fn issue_offline_token(
        &self,
        user_id: &str,
        resource_id: &str,
        viewer_token: &str,
    ) -> Result<OfflineGrant, AccessError> {
        let viewer = self.validate(user_id, viewer_token)?;
        if viewer.resource_id != resource_id {
            return Err(AccessError::Mismatch);
        }
        let grant = self.require_grant(user_id, resource_id, Some(&viewer.session_id))?;

        let now = self.clock.now();
        let claims = OfflineClaims {
            user_id: user_id.to_string(),
            resource_id: resource_id.to_string(),
            issued_at: now,
            expires_at: now + self.policy.offline_token_ttl,
        };
        let token = self.signer.issue(&claims)?;

        info!(
            user_id = %user_id,
            resource_id = %resource_id,
            expires_at = %claims.expires_at,
            "Offline token issued"
        );
        Ok(OfflineGrant {
            token,
            watermark: WatermarkPayload::from(&grant),
            claims,
        })
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Audit trail of a session owned by `user_id`.
    pub fn session_audit(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<AuditLogEntry>, AccessError> {
        match self.db.get_session(session_id)? {
            Some(session) if session.user_id == user_id => {
                Ok(self.db.audit_for_session(session_id)?)
            }
            _ => Err(AccessError::NotFound),
        }
    }

    fn require_grant(
        &self,
        user_id: &str,
        resource_id: &str,
        session_id: Option<&str>,
    ) -> Result<GrantRecord, AccessError> {
        match self.grants.has_paid_grant(user_id, resource_id)? {
            GrantDecision::Granted(grant) => Ok(grant),
            GrantDecision::Denied(reason) => {
                let mut entry =
                    AuditLogEntry::new(AuditAction::Blocked, user_id, resource_id, self.clock.now())
                        .with_context(json!({ "reason": reason }));
                if let Some(session_id) = session_id {
                    entry = entry.with_session(session_id);
                }
                self.db.append_audit(&[entry])?;
                info!(user_id = %user_id, resource_id = %resource_id, reason = %reason, "Access denied");
                Err(AccessError::Revoked(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use zeroize::Zeroizing;

    struct Fixture {
        manager: Arc<SessionManager>,
        db: Arc<AccessDatabase>,
        clock: Arc<ManualClock>,
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_760_000_000_000).unwrap()
    }

    fn fixture() -> Fixture {
        fixture_with_policy(SessionPolicy::default())
    }

    fn fixture_with_policy(policy: SessionPolicy) -> Fixture {
        let db = Arc::new(AccessDatabase::in_memory().unwrap());
        db.upsert_grant(&GrantRecord::paid(
            "alice",
            "r1",
            "alice@example.com",
            "Night Trains",
            start() - Duration::days(3),
        ))
        .unwrap();
        db.upsert_grant(&GrantRecord::paid(
            "alice",
            "r2",
            "alice@example.com",
            "Harbour Lights",
            start() - Duration::days(1),
        ))
        .unwrap();

        let clock = Arc::new(ManualClock::new(start()));
        let signer = TokenSigner::new(Zeroizing::new(vec![7u8; 32])).unwrap();
        let manager = Arc::new(SessionManager::new(
            db.clone(),
            signer,
            db.clone(),
            clock.clone(),
            policy,
        ));
        Fixture { manager, db, clock }
    }

    fn open(f: &Fixture, resource: &str) -> OpenedSession {
        f.manager
            .open("alice", resource, &ClientInfo::default())
            .unwrap()
    }

    #[test]
    fn open_requires_paid_grant() {
        let f = fixture();
        let err = f
            .manager
            .open("alice", "r9", &ClientInfo::default())
            .unwrap_err();
        assert!(matches!(err, AccessError::Revoked(_)));

        let blocked: Vec<_> = f
            .db
            .audit_entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.action == AuditAction::Blocked)
            .collect();
        assert_eq!(blocked.len(), 1);
    }

    #[test]
    fn reopening_supersedes_previous_token() {
        let f = fixture();
        let first = open(&f, "r1");
        let second = open(&f, "r1");
        assert_eq!(second.superseded, vec![first.session.session_id.clone()]);

        assert!(matches!(
            f.manager.validate("alice", &first.viewer_token.token),
            Err(AccessError::Expired)
        ));
        assert!(f.manager.validate("alice", &second.viewer_token.token).is_ok());
    }

    #[test]
    fn concurrent_opens_leave_one_active_session() {
        let f = fixture();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let manager = f.manager.clone();
                scope.spawn(move || {
                    manager.open("alice", "r1", &ClientInfo::default()).unwrap();
                });
            }
        });

        let sessions = f.db.sessions_for_pair("alice", "r1").unwrap();
        assert_eq!(sessions.len(), 8);
        assert_eq!(sessions.iter().filter(|s| s.is_active).count(), 1);
        let active = f.db.active_session("alice", "r1").unwrap().unwrap();
        assert!(active.is_active);
    }

    #[test]
    fn heartbeat_after_sixteen_minutes_rotates() {
        let f = fixture();
        let opened = open(&f, "r1");
        let t1 = opened.viewer_token.token;

        f.clock.advance(Duration::minutes(5));
        let early = f.manager.heartbeat("alice", &t1).unwrap();
        assert!(early.rotated.is_none());

        f.clock.advance(Duration::minutes(11));
        let refresh = f.manager.heartbeat("alice", &t1).unwrap();
        let t2 = refresh.rotated.expect("token rotated");
        assert_eq!(refresh.claims.rotation_count, 1);

        assert!(matches!(
            f.manager.validate("alice", &t1),
            Err(AccessError::Expired)
        ));
        assert!(f.manager.validate("alice", &t2).is_ok());
    }

    #[test]
    fn page_views_are_counted_and_audited() {
        let f = fixture();
        let opened = open(&f, "r1");
        let token = opened.viewer_token.token;

        f.manager.page_view("alice", &token, 1).unwrap();
        f.clock.advance(Duration::seconds(30));
        let refresh = f.manager.page_view("alice", &token, 2).unwrap();
        assert_eq!(refresh.pages_viewed, 2);

        let audit = f
            .manager
            .session_audit("alice", &opened.session.session_id)
            .unwrap();
        let pages: Vec<_> = audit
            .iter()
            .filter(|e| e.action == AuditAction::PageView)
            .filter_map(|e| e.page_number)
            .collect();
        assert_eq!(pages, vec![1, 2]);
    }

    #[test]
    fn idle_timeout_is_detected_at_validation() {
        let f = fixture_with_policy(SessionPolicy {
            max_idle: Duration::minutes(10),
            ..SessionPolicy::default()
        });
        let opened = open(&f, "r1");
        let token = opened.viewer_token.token;

        f.clock.advance(Duration::minutes(9));
        f.manager.heartbeat("alice", &token).unwrap();

        // Validation is not activity: idle is measured from the heartbeat.
        f.clock.advance(Duration::minutes(9));
        assert!(f.manager.validate("alice", &token).is_ok());
        f.clock.advance(Duration::minutes(2));
        assert!(matches!(
            f.manager.validate("alice", &token),
            Err(AccessError::IdleTimeout)
        ));

        let session = f.db.get_session(&opened.session.session_id).unwrap().unwrap();
        assert!(!session.is_active);
        assert_eq!(session.end_reason, Some(SessionEndReason::IdleTimeout));
        assert!(f.db.active_session("alice", "r1").unwrap().is_none());

        let audit = f.db.audit_for_session(&opened.session.session_id).unwrap();
        assert!(audit.iter().any(|e| e.action == AuditAction::Expired));
        assert!(matches!(
            f.manager.validate("alice", &token),
            Err(AccessError::Expired)
        ));
    }

    #[test]
    fn tampered_and_foreign_tokens_are_rejected() {
        let f = fixture();
        let opened = open(&f, "r1");
        let mut forged = opened.viewer_token.token.clone();
        forged.push('0');
        assert!(matches!(
            f.manager.validate("alice", &forged),
            Err(AccessError::BadSignature)
        ));
        assert!(matches!(
            f.manager.validate("mallory", &opened.viewer_token.token),
            Err(AccessError::Mismatch)
        ));
    }

    #[test]
    fn close_records_duration_and_is_idempotent() {
        let f = fixture();
        let opened = open(&f, "r1");
        f.clock.advance(Duration::minutes(4));

        assert!(f.manager.close(&opened.viewer_token.token).unwrap());
        assert!(!f.manager.close(&opened.viewer_token.token).unwrap());

        let session = f.db.get_session(&opened.session.session_id).unwrap().unwrap();
        assert!(!session.is_active);
        assert_eq!(session.duration_seconds, 240);
        assert_eq!(session.end_reason, Some(SessionEndReason::Closed));
        assert!(matches!(
            f.manager.validate("alice", &opened.viewer_token.token),
            Err(AccessError::Expired)
        ));
    }

    #[test]
    fn offline_token_carries_watermark_and_rechecks_grant() {
        let f = fixture();
        let opened = open(&f, "r2");
        let grant = f
            .manager
            .issue_offline_token("alice", "r2", &opened.viewer_token.token)
            .unwrap();
        assert_eq!(grant.watermark.resource_title, "Harbour Lights");
        assert_eq!(grant.watermark.user_email, "alice@example.com");
        assert_eq!(grant.claims.expires_at - grant.claims.issued_at, Duration::days(30));

        assert!(matches!(
            f.manager
                .issue_offline_token("alice", "r1", &opened.viewer_token.token),
            Err(AccessError::Mismatch)
        ));

        f.db.revoke_grant("alice", "r2").unwrap();
        assert!(matches!(
            f.manager
                .issue_offline_token("alice", "r2", &opened.viewer_token.token),
            Err(AccessError::Revoked(_))
        ));
    }

    #[test]
    fn audit_is_private_to_the_owner() {
        let f = fixture();
        let opened = open(&f, "r1");
        assert!(matches!(
            f.manager.session_audit("bob", &opened.session.session_id),
            Err(AccessError::NotFound)
        ));
    }
}
