// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{auth::Auth, error::ApiError, models::SessionAuditResponse, state::AppState};

#[utoipa::path(
    get,
    path = "/v1/audit/sessions/{session_id}",
    params(
        ("session_id" = String, Path, description = "Viewer session identifier")
    ),
    tag = "Audit",
    responses(
        (status = 200, body = SessionAuditResponse),
        (status = 404, description = "No session with this id belongs to the caller")
    )
)]
pub async fn session_audit(
    Auth(user): Auth,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SessionAuditResponse>, ApiError> {
    let entries = state.sessions.session_audit(&user.user_id, &session_id)?;
    Ok(Json(SessionAuditResponse {
        session_id,
        entries,
    }))
}
