// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use tracing::info;

use super::viewer_token;
use crate::{
    auth::Auth,
    error::ApiError,
    models::OfflineTokenResponse,
    state::AppState,
    sync::protocol::{partition_grants, ReconcileRequest, ReconcileResponse, MAX_RECONCILE_IDS},
};

/// Issue an offline possession token for the document of a live viewer
/// session. The grant is re-checked before signing.
#[utoipa::path(
    post,
    path = "/v1/offline/{resource_id}/token",
    params(
        ("resource_id" = String, Path, description = "Document identifier"),
        ("X-Viewer-Token" = String, Header, description = "Viewer token for this document")
    ),
    tag = "Offline",
    responses(
        (status = 200, body = OfflineTokenResponse),
        (status = 401, description = "Viewer token expired, idle or invalid"),
        (status = 403, description = "Grant revoked or token issued for another document")
    )
)]
pub async fn issue_offline_token(
    Auth(user): Auth,
    Path(resource_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OfflineTokenResponse>, ApiError> {
    let token = viewer_token(&headers)?;
    let grant = state
        .sessions
        .issue_offline_token(&user.user_id, &resource_id, token)?;

    Ok(Json(OfflineTokenResponse {
        resource_id: grant.claims.resource_id,
        offline_token: grant.token,
        expires_at: grant.claims.expires_at,
        watermark: grant.watermark,
    }))
}

/// Split the caller's locally held resource ids into those still granted
/// and those that must be deleted.
#[utoipa::path(
    post,
    path = "/v1/offline/reconcile",
    request_body = ReconcileRequest,
    tag = "Offline",
    responses(
        (status = 200, body = ReconcileResponse),
        (status = 400, description = "Too many resource ids")
    )
)]
pub async fn reconcile(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    if request.resource_ids.len() > MAX_RECONCILE_IDS {
        return Err(ApiError::bad_request(format!(
            "At most {MAX_RECONCILE_IDS} resource ids per reconcile"
        )));
    }

    let response = partition_grants(state.grants.as_ref(), &user.user_id, &request.resource_ids)?;
    info!(
        user_id = %user.user_id,
        valid = response.valid.len(),
        revoked = response.revoked.len(),
        "Reconcile answered"
    );
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::*;
    use crate::session::ClientInfo;
    use crate::token::{peek, OfflineClaims};
    use axum::http::StatusCode;
    use chrono::Duration;

    #[tokio::test]
    async fn offline_token_carries_watermark_and_thirty_day_expiry() {
        let app = test_app();
        let opened = app
            .state
            .sessions
            .open("alice", "r2", &ClientInfo::default())
            .unwrap();

        let Json(response) = issue_offline_token(
            Auth(user("alice")),
            Path("r2".to_string()),
            State(app.state.clone()),
            viewer_headers(&opened.viewer_token.token),
        )
        .await
        .unwrap();

        assert_eq!(response.watermark.user_email, "alice@example.com");
        assert_eq!(response.watermark.resource_title, "Harbour Lights");
        assert_eq!(
            response.expires_at - opened.session.started_at,
            Duration::days(30)
        );
        let claims: OfflineClaims = peek(&response.offline_token).unwrap();
        assert_eq!(claims.resource_id, "r2");
        assert_eq!(claims.user_id, "alice");
    }

    #[tokio::test]
    async fn offline_token_refused_after_refund() {
        let app = test_app();
        let opened = app
            .state
            .sessions
            .open("alice", "r1", &ClientInfo::default())
            .unwrap();
        app.db.revoke_grant("alice", "r1").unwrap();

        let err = issue_offline_token(
            Auth(user("alice")),
            Path("r1".to_string()),
            State(app.state.clone()),
            viewer_headers(&opened.viewer_token.token),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.error_code, "revoked");
    }

    #[tokio::test]
    async fn reconcile_rejects_oversized_requests() {
        let app = test_app();
        let ids = (0..=MAX_RECONCILE_IDS).map(|i| format!("r{i}")).collect();
        let err = reconcile(
            Auth(user("alice")),
            State(app.state.clone()),
            Json(ReconcileRequest { resource_ids: ids }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reconcile_is_scoped_to_caller() {
        let app = test_app();
        let Json(response) = reconcile(
            Auth(user("bob")),
            State(app.state.clone()),
            Json(ReconcileRequest {
                resource_ids: vec!["r1".to_string(), "r2".to_string()],
            }),
        )
        .await
        .unwrap();
        assert!(response.valid.is_empty());
        assert_eq!(response.revoked, vec!["r1", "r2"]);
    }
}
