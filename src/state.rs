// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::IdentityVerifier;
use crate::grants::{GrantChecker, ResourceSource};
use crate::session::SessionManager;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub grants: Arc<dyn GrantChecker>,
    pub documents: Arc<dyn ResourceSource>,
    pub identity: Arc<IdentityVerifier>,
    /// Checked by the readiness probe when set.
    pub data_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionManager>,
        grants: Arc<dyn GrantChecker>,
        documents: Arc<dyn ResourceSource>,
        identity: IdentityVerifier,
    ) -> Self {
        Self {
            sessions,
            grants,
            documents,
            identity: Arc::new(identity),
            data_dir: None,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }
}
