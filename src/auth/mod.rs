// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Identity-provider JWT authentication for the access API.
//!
//! ## Auth Flow
//!
//! 1. The reader application signs the user in with the identity provider
//! 2. Every `/v1` request carries `Authorization: Bearer <identity JWT>`
//! 3. The server:
//!    - Verifies the HS256 signature with `IDENTITY_JWT_SECRET`
//!    - Checks expiry, and issuer/audience when configured
//!    - Extracts `sub` as the canonical `user_id`
//!
//! Viewer tokens are a separate credential handled by
//! [`crate::session::SessionManager`]; an identity JWT alone never grants
//! access to document bytes.
//!
//! ## Security
//!
//! - All non-health endpoints require authentication
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod error;
pub mod extractor;

pub use claims::{AuthenticatedUser, IdentityClaims};
pub use error::AuthError;
pub use extractor::{Auth, IdentityVerifier};
