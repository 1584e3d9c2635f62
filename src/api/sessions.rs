// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::debug;

use super::{client_info, viewer_token};
use crate::{
    auth::Auth,
    error::ApiError,
    grants::is_valid_resource_id,
    models::{
        CloseSessionRequest, OpenSessionRequest, PageViewRequest, SessionRefreshResponse,
        SessionTokenResponse,
    },
    session::SessionRefresh,
    state::AppState,
};

impl From<SessionRefresh> for SessionRefreshResponse {
    fn from(refresh: SessionRefresh) -> Self {
        Self {
            session_id: refresh.session_id,
            rotated: refresh.rotated.is_some(),
            viewer_token: refresh.rotated,
            expires_at: refresh.claims.expires_at,
            rotation_count: refresh.claims.rotation_count,
            pages_viewed: refresh.pages_viewed,
        }
    }
}

/// Open a viewer session, closing any other session the caller has open on
/// the same document.
#[utoipa::path(
    post,
    path = "/v1/sessions",
    request_body = OpenSessionRequest,
    tag = "Sessions",
    responses(
        (status = 201, body = SessionTokenResponse),
        (status = 400, description = "Malformed resource id"),
        (status = 401, description = "Missing or invalid identity token"),
        (status = 403, description = "No paid grant for the document")
    )
)]
pub async fn open_session(
    Auth(user): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OpenSessionRequest>,
) -> Result<(StatusCode, Json<SessionTokenResponse>), ApiError> {
    if !is_valid_resource_id(&request.resource_id) {
        return Err(ApiError::bad_request("Invalid resource_id"));
    }

    let opened = state
        .sessions
        .open(&user.user_id, &request.resource_id, &client_info(&headers))?;

    Ok((
        StatusCode::CREATED,
        Json(SessionTokenResponse {
            session_id: opened.session.session_id,
            resource_id: opened.session.resource_id,
            viewer_token: opened.viewer_token.token,
            expires_at: opened.viewer_token.claims.expires_at,
            rotation_count: opened.viewer_token.claims.rotation_count,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/heartbeat",
    params(("X-Viewer-Token" = String, Header, description = "Current viewer token")),
    tag = "Sessions",
    responses(
        (status = 200, body = SessionRefreshResponse),
        (status = 401, description = "Viewer token expired, idle or invalid")
    )
)]
pub async fn heartbeat(
    Auth(user): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionRefreshResponse>, ApiError> {
    let token = viewer_token(&headers)?;
    let refresh = state.sessions.heartbeat(&user.user_id, token)?;
    Ok(Json(refresh.into()))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/page-view",
    request_body = PageViewRequest,
    params(("X-Viewer-Token" = String, Header, description = "Current viewer token")),
    tag = "Sessions",
    responses(
        (status = 200, body = SessionRefreshResponse),
        (status = 401, description = "Viewer token expired, idle or invalid")
    )
)]
pub async fn page_view(
    Auth(user): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PageViewRequest>,
) -> Result<Json<SessionRefreshResponse>, ApiError> {
    let token = viewer_token(&headers)?;
    let refresh = state
        .sessions
        .page_view(&user.user_id, token, request.page_number)?;
    Ok(Json(refresh.into()))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/rotate",
    params(("X-Viewer-Token" = String, Header, description = "Current viewer token")),
    tag = "Sessions",
    responses(
        (status = 200, body = SessionRefreshResponse),
        (status = 401, description = "Viewer token expired, idle or invalid")
    )
)]
pub async fn rotate(
    Auth(user): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionRefreshResponse>, ApiError> {
    let token = viewer_token(&headers)?;
    let refresh = state.sessions.rotate(&user.user_id, token)?;
    Ok(Json(refresh.into()))
}

/// Close a session. Answers 204 whether or not anything was still open so
/// unload beacons can fire and forget.
///
/// No bearer token is required; the signed viewer token in the body
/// authorizes the close.
#[utoipa::path(
    post,
    path = "/v1/sessions/close",
    request_body = CloseSessionRequest,
    tag = "Sessions",
    responses(
        (status = 204),
        (status = 401, description = "Viewer token signature is invalid")
    )
)]
pub async fn close_session(
    State(state): State<AppState>,
    Json(request): Json<CloseSessionRequest>,
) -> Result<StatusCode, ApiError> {
    if !state.sessions.close(&request.viewer_token)? {
        debug!("Close request had nothing to close");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::*;
    use crate::storage::AuditAction;
    use chrono::Duration;

    async fn open(state: &AppState, resource_id: &str) -> SessionTokenResponse {
        let (status, Json(opened)) = open_session(
            Auth(user("alice")),
            State(state.clone()),
            HeaderMap::new(),
            Json(OpenSessionRequest {
                resource_id: resource_id.to_string(),
            }),
        )
        .await
        .expect("session opens");
        assert_eq!(status, StatusCode::CREATED);
        opened
    }

    #[tokio::test]
    async fn open_rejects_malformed_resource_id() {
        let app = test_app();
        let err = open_session(
            Auth(user("alice")),
            State(app.state.clone()),
            HeaderMap::new(),
            Json(OpenSessionRequest {
                resource_id: "../etc/passwd".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn heartbeat_without_viewer_token_is_unauthorized() {
        let app = test_app();
        let err = heartbeat(Auth(user("alice")), State(app.state.clone()), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn heartbeat_rotates_after_interval() {
        let app = test_app();
        let opened = open(&app.state, "r1").await;

        let Json(fresh) = heartbeat(
            Auth(user("alice")),
            State(app.state.clone()),
            viewer_headers(&opened.viewer_token),
        )
        .await
        .unwrap();
        assert!(!fresh.rotated);
        assert!(fresh.viewer_token.is_none());

        app.clock.advance(Duration::minutes(16));
        let Json(rotated) = heartbeat(
            Auth(user("alice")),
            State(app.state.clone()),
            viewer_headers(&opened.viewer_token),
        )
        .await
        .unwrap();
        assert!(rotated.rotated);
        assert_eq!(rotated.rotation_count, 1);

        // The superseded token no longer works.
        let err = heartbeat(
            Auth(user("alice")),
            State(app.state.clone()),
            viewer_headers(&opened.viewer_token),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code, "expired");
    }

    #[tokio::test]
    async fn page_views_are_counted_and_audited() {
        let app = test_app();
        let opened = open(&app.state, "r1").await;

        for page in [1, 2, 3] {
            app.clock.advance(Duration::seconds(20));
            page_view(
                Auth(user("alice")),
                State(app.state.clone()),
                viewer_headers(&opened.viewer_token),
                Json(PageViewRequest { page_number: page }),
            )
            .await
            .unwrap();
        }

        let Json(forced) = rotate(
            Auth(user("alice")),
            State(app.state.clone()),
            viewer_headers(&opened.viewer_token),
        )
        .await
        .unwrap();
        assert_eq!(forced.pages_viewed, 3);
        assert!(forced.rotated);

        let views = app
            .db
            .audit_for_session(&opened.session_id)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == AuditAction::PageView)
            .count();
        assert_eq!(views, 3);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_forged_tokens() {
        let app = test_app();
        let opened = open(&app.state, "r2").await;

        for _ in 0..2 {
            let status = close_session(
                State(app.state.clone()),
                Json(CloseSessionRequest {
                    viewer_token: opened.viewer_token.clone(),
                }),
            )
            .await
            .unwrap();
            assert_eq!(status, StatusCode::NO_CONTENT);
        }

        let session = app.db.get_session(&opened.session_id).unwrap().unwrap();
        assert!(!session.is_active);

        let err = close_session(
            State(app.state.clone()),
            Json(CloseSessionRequest {
                viewer_token: "garbage".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}
