// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        HeaderMap,
    },
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::viewer_token;
use crate::{
    auth::Auth,
    error::{AccessError, ApiError},
    state::AppState,
};

/// Document bytes for the resource the viewer token was issued for.
///
/// Does not count as session activity; page views are reported separately.
#[utoipa::path(
    get,
    path = "/v1/documents/{resource_id}",
    params(
        ("resource_id" = String, Path, description = "Document identifier"),
        ("X-Viewer-Token" = String, Header, description = "Viewer token for this document")
    ),
    tag = "Documents",
    responses(
        (status = 200, description = "Document bytes as application/octet-stream"),
        (status = 401, description = "Viewer token expired, idle or invalid"),
        (status = 403, description = "Viewer token was issued for another document"),
        (status = 404, description = "Document bytes are not available")
    )
)]
pub async fn get_document(
    Auth(user): Auth,
    Path(resource_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = viewer_token(&headers)?;
    let claims = state.sessions.validate(&user.user_id, token)?;
    if claims.resource_id != resource_id {
        return Err(AccessError::Mismatch.into());
    }

    let bytes = state.documents.fetch_resource_bytes(&resource_id)?;
    debug!(
        session_id = %claims.session_id,
        resource_id = %resource_id,
        bytes = bytes.len(),
        "Serving document"
    );
    Ok((
        [
            (CONTENT_TYPE, "application/octet-stream"),
            (CACHE_CONTROL, "no-store"),
        ],
        bytes,
    )
        .into_response())
}
