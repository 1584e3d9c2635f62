// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access error taxonomy and HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::storage::StoreError;
use crate::token::TokenError;

/// Tracing target for tamper events (forged tokens, failed integrity checks).
pub const SECURITY_LOG_TARGET: &str = "docvault::security";

/// Why access to a document was denied.
///
/// Every variant is locally recoverable: the caller discards the credential
/// or entry and re-acquires (re-open the session, re-download the offline
/// copy). `BadSignature` additionally indicates possible tampering and is
/// written to the security log.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Token forged, tampered or malformed.
    #[error("credential signature is invalid")]
    BadSignature,
    /// Natural lifecycle expiry, including superseded or rotated tokens.
    #[error("credential has expired")]
    Expired,
    #[error("not found")]
    NotFound,
    /// Grant absent or no longer paid.
    #[error("access revoked: {0}")]
    Revoked(String),
    /// Session was idle past the allowed window.
    #[error("session idle timeout")]
    IdleTimeout,
    /// Credential is valid but belongs to another user or resource.
    #[error("credential does not cover this request")]
    Mismatch,
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AccessError::BadSignature => "bad_signature",
            AccessError::Expired => "expired",
            AccessError::NotFound => "not_found",
            AccessError::Revoked(_) => "revoked",
            AccessError::IdleTimeout => "idle_timeout",
            AccessError::Mismatch => "credential_mismatch",
            AccessError::Storage(_) | AccessError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AccessError::BadSignature | AccessError::Expired | AccessError::IdleTimeout => {
                StatusCode::UNAUTHORIZED
            }
            AccessError::Revoked(_) | AccessError::Mismatch => StatusCode::FORBIDDEN,
            AccessError::NotFound => StatusCode::NOT_FOUND,
            AccessError::Storage(_) | AccessError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<TokenError> for AccessError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Malformed | TokenError::BadSignature => AccessError::BadSignature,
            TokenError::Expired => AccessError::Expired,
            TokenError::Encode(msg) => AccessError::Internal(msg),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_code: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    error_code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        let error_code = match status {
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::BAD_REQUEST => "bad_request",
            StatusCode::UNPROCESSABLE_ENTITY => "unprocessable",
            StatusCode::FORBIDDEN => "forbidden",
            StatusCode::UNAUTHORIZED => "unauthorized",
            _ => "internal_error",
        };
        Self {
            status,
            message: message.into(),
            error_code,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<AccessError> for ApiError {
    fn from(e: AccessError) -> Self {
        let status = e.status_code();
        let message = match &e {
            // Never leak storage details to clients.
            AccessError::Storage(_) | AccessError::Internal(_) => {
                tracing::error!(error = %e, "access check failed internally");
                "Internal server error".to_string()
            }
            AccessError::Expired | AccessError::IdleTimeout => {
                "Access expired, reopen the document to continue".to_string()
            }
            _ => e.to_string(),
        };
        Self {
            status,
            message,
            error_code: e.error_code(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        AccessError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.error_code.to_string(),
        });
        (self.status, body).into_response()
    }
}
