// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client transport to the access server.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::protocol::{ReconcileRequest, ReconcileResponse};
use super::SyncError;
use crate::models::{OfflineTokenResponse, OpenSessionRequest, SessionTokenResponse, VIEWER_TOKEN_HEADER};
use crate::vault::{OfflineVault, VaultMetadata};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server operations the sync agent and the offline mediator depend on.
pub trait AccessTransport: Send + Sync {
    /// Ask which of the locally held resources are still granted.
    fn reconcile(
        &self,
        resource_ids: &[String],
    ) -> impl Future<Output = Result<ReconcileResponse, SyncError>> + Send;

    /// Fetch document bytes with a viewer token.
    fn fetch_document(
        &self,
        resource_id: &str,
        viewer_token: &str,
    ) -> impl Future<Output = Result<Vec<u8>, SyncError>> + Send;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    error_code: String,
}

/// reqwest implementation of [`AccessTransport`] plus the session and
/// offline-download calls used by reader applications.
#[derive(Debug, Clone)]
pub struct HttpAccessClient {
    http: Client,
    base_url: Url,
    bearer_token: String,
}

impl HttpAccessClient {
    pub fn new(base_url: &str, bearer_token: impl Into<String>) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SyncError::Http)?;
        let mut base_url = Url::parse(base_url)?;
        // Endpoints are joined as relative paths; keep the last segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            bearer_token: bearer_token.into(),
        })
    }

    /// Replace the identity token after the identity provider refreshed it.
    pub fn set_bearer_token(&mut self, bearer_token: impl Into<String>) {
        self.bearer_token = bearer_token.into();
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        Ok(self.base_url.join(path)?)
    }

    async fn check(response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let (error_code, message) = match response.json::<ErrorBody>().await {
            Ok(body) => (Some(body.error_code), body.error),
            Err(_) => (None, status.to_string()),
        };
        Err(SyncError::Status {
            status: status.as_u16(),
            error_code,
            message,
        })
    }

    pub async fn open_session(&self, resource_id: &str) -> Result<SessionTokenResponse, SyncError> {
        let response = self
            .http
            .post(self.endpoint("v1/sessions")?)
            .bearer_auth(&self.bearer_token)
            .json(&OpenSessionRequest {
                resource_id: resource_id.to_string(),
            })
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn request_offline_token(
        &self,
        resource_id: &str,
        viewer_token: &str,
    ) -> Result<OfflineTokenResponse, SyncError> {
        let path = format!("v1/offline/{resource_id}/token");
        let response = self
            .http
            .post(self.endpoint(&path)?)
            .bearer_auth(&self.bearer_token)
            .header(VIEWER_TOKEN_HEADER, viewer_token)
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Fetch the document and an offline token, then store both in the
    /// vault.
    pub async fn download_for_offline(
        &self,
        vault: &OfflineVault,
        resource_id: &str,
        viewer_token: &str,
    ) -> Result<VaultMetadata, SyncError> {
        let bytes = self.fetch_document(resource_id, viewer_token).await?;
        let grant = self.request_offline_token(resource_id, viewer_token).await?;
        let title = grant.watermark.resource_title.clone();
        let metadata = vault
            .store(resource_id, &bytes, &grant.offline_token, grant.watermark, &title)
            .await?;
        Ok(metadata)
    }
}

impl AccessTransport for HttpAccessClient {
    async fn reconcile(&self, resource_ids: &[String]) -> Result<ReconcileResponse, SyncError> {
        let response = self
            .http
            .post(self.endpoint("v1/offline/reconcile")?)
            .bearer_auth(&self.bearer_token)
            .json(&ReconcileRequest {
                resource_ids: resource_ids.to_vec(),
            })
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        let body: ReconcileResponse = Self::check(response).await?.json().await?;
        debug!(
            valid = body.valid.len(),
            revoked = body.revoked.len(),
            "Reconcile response received"
        );
        Ok(body)
    }

    async fn fetch_document(
        &self,
        resource_id: &str,
        viewer_token: &str,
    ) -> Result<Vec<u8>, SyncError> {
        let path = format!("v1/documents/{resource_id}");
        let response = self
            .http
            .get(self.endpoint(&path)?)
            .bearer_auth(&self.bearer_token)
            .header(VIEWER_TOKEN_HEADER, viewer_token)
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
