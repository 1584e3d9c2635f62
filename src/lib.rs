// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! DocVault - Protected Document Access & Offline Delivery
//!
//! Paying readers get temporary, revocable access to documents, and that
//! access keeps working offline without letting a copy outlive its grant.
//!
//! ## Modules
//!
//! - `session` - Server-side viewer sessions (open, rotate, idle expiry, close)
//! - `token` - Signed viewer and offline token codec
//! - `crypto` - AES-256-GCM sealing and checksums for the offline vault
//! - `vault` - Client-side encrypted offline vault
//! - `sync` - Revocation reconcile agent and offline fetch mediator
//! - `storage` - redb persistence for sessions, grants and the audit log
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Identity-provider JWT authentication

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod grants;
pub mod models;
pub mod session;
pub mod state;
pub mod storage;
pub mod sync;
pub mod token;
pub mod vault;
