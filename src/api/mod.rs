// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    error::ApiError,
    grants::GrantStatus,
    models::{
        CloseSessionRequest, OfflineTokenResponse, OpenSessionRequest, PageViewRequest,
        SessionAuditResponse, SessionRefreshResponse, SessionTokenResponse, WatermarkPayload,
        VIEWER_TOKEN_HEADER,
    },
    session::ClientInfo,
    state::AppState,
    storage::{AuditAction, AuditLogEntry},
    sync::protocol::{ReconcileRequest, ReconcileResponse},
};

pub mod audit;
pub mod documents;
pub mod health;
pub mod offline;
pub mod sessions;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/sessions", post(sessions::open_session))
        .route("/sessions/heartbeat", post(sessions::heartbeat))
        .route("/sessions/page-view", post(sessions::page_view))
        .route("/sessions/rotate", post(sessions::rotate))
        .route("/sessions/close", post(sessions::close_session))
        .route("/documents/{resource_id}", get(documents::get_document))
        .route(
            "/offline/{resource_id}/token",
            post(offline::issue_offline_token),
        )
        .route("/offline/reconcile", post(offline::reconcile))
        .route("/audit/sessions/{session_id}", get(audit::session_audit));

    Router::new()
        .nest("/v1", v1_routes)
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

/// Viewer token from the `X-Viewer-Token` header.
pub(crate) fn viewer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(VIEWER_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("X-Viewer-Token header is required"))
}

/// Client address and user agent for the session record.
///
/// The first `X-Forwarded-For` hop is used since the server normally sits
/// behind a proxy.
pub(crate) fn client_info(headers: &HeaderMap) -> ClientInfo {
    ClientInfo {
        ip_address: header_str(headers, "x-forwarded-for")
            .and_then(|hops| hops.split(',').next())
            .map(|ip| ip.trim().to_string()),
        user_agent: header_str(headers, "user-agent").map(str::to_string),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        sessions::open_session,
        sessions::heartbeat,
        sessions::page_view,
        sessions::rotate,
        sessions::close_session,
        documents::get_document,
        offline::issue_offline_token,
        offline::reconcile,
        audit::session_audit,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            OpenSessionRequest,
            SessionTokenResponse,
            SessionRefreshResponse,
            PageViewRequest,
            CloseSessionRequest,
            OfflineTokenResponse,
            WatermarkPayload,
            ReconcileRequest,
            ReconcileResponse,
            SessionAuditResponse,
            AuditLogEntry,
            AuditAction,
            GrantStatus,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Sessions", description = "Viewer session lifecycle"),
        (name = "Documents", description = "Protected document bytes"),
        (name = "Offline", description = "Offline tokens and revocation reconcile"),
        (name = "Audit", description = "Session audit trail"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

/// Shared fixtures for handler tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::http::HeaderValue;
    use chrono::{DateTime, Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use zeroize::Zeroizing;

    use super::*;
    use crate::auth::{AuthenticatedUser, IdentityClaims, IdentityVerifier};
    use crate::clock::ManualClock;
    use crate::config::{IdentityConfig, SessionPolicy};
    use crate::error::AccessError;
    use crate::grants::{GrantRecord, ResourceSource};
    use crate::session::SessionManager;
    use crate::storage::AccessDatabase;
    use crate::token::TokenSigner;

    pub const IDENTITY_SECRET: &[u8] = b"identity-provider-test-secret-0123456789";

    /// In-memory document bytes.
    pub struct MemoryDocuments(pub HashMap<String, Vec<u8>>);

    impl ResourceSource for MemoryDocuments {
        fn fetch_resource_bytes(&self, resource_id: &str) -> Result<Vec<u8>, AccessError> {
            self.0.get(resource_id).cloned().ok_or(AccessError::NotFound)
        }
    }

    pub struct TestApp {
        pub state: AppState,
        pub db: Arc<AccessDatabase>,
        pub clock: Arc<ManualClock>,
    }

    /// alice owns `r1` and `r2`; only `r1` has bytes on disk.
    pub fn test_app() -> TestApp {
        let db = Arc::new(AccessDatabase::in_memory().unwrap());
        let purchased = Utc::now() - Duration::days(2);
        db.upsert_grant(&GrantRecord::paid(
            "alice",
            "r1",
            "alice@example.com",
            "Night Trains",
            purchased,
        ))
        .unwrap();
        db.upsert_grant(&GrantRecord::paid(
            "alice",
            "r2",
            "alice@example.com",
            "Harbour Lights",
            purchased,
        ))
        .unwrap();

        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let signer = TokenSigner::new(Zeroizing::new(vec![9u8; 32])).unwrap();
        let sessions = Arc::new(SessionManager::new(
            db.clone(),
            signer,
            db.clone(),
            clock.clone(),
            SessionPolicy::default(),
        ));
        let documents = MemoryDocuments(HashMap::from([(
            "r1".to_string(),
            b"%PDF-1.7 night trains".to_vec(),
        )]));
        let identity = IdentityVerifier::new(&IdentityConfig {
            jwt_secret: Zeroizing::new(IDENTITY_SECRET.to_vec()),
            issuer: None,
            audience: None,
        });

        TestApp {
            state: AppState::new(sessions, db.clone(), Arc::new(documents), identity),
            db,
            clock,
        }
    }

    pub fn identity_jwt(user_id: &str) -> String {
        let claims = IdentityClaims {
            sub: user_id.to_string(),
            exp: Utc::now().timestamp() + 3600,
            iat: Some(Utc::now().timestamp()),
            iss: None,
            aud: None,
            email: Some(format!("{user_id}@example.com")),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(IDENTITY_SECRET),
        )
        .unwrap()
    }

    pub fn user(user_id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: user_id.to_string(),
            email: None,
            expires_at: Utc::now().timestamp() + 3600,
        }
    }

    pub fn viewer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(VIEWER_TOKEN_HEADER, HeaderValue::from_str(token).unwrap());
        headers
    }
}
