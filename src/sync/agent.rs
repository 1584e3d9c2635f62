// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Revocation Sync Agent
//!
//! Background task that reconciles the offline vault against the server.
//!
//! ## Triggers
//!
//! - once at startup if online, then every `interval` while online
//! - every offline to online transition reported by the connectivity watch
//! - on demand through [`SyncHandle::reconcile`]
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::client::AccessTransport;
use super::protocol::{ReconcileResponse, MAX_RECONCILE_IDS};
use super::SyncError;
use crate::config::VaultConfig;
use crate::vault::{OfflineVault, RemovalReason};

const NOTICE_CAPACITY: usize = 64;
const REQUEST_CAPACITY: usize = 8;

/// Emitted once per resource removed because the server revoked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationNotice {
    pub resource_id: String,
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub valid: Vec<String>,
    /// Revoked ids that were removed from the vault by this pass.
    pub removed: Vec<String>,
    pub expired_swept: usize,
}

type ReconcileReply = oneshot::Sender<Result<ReconcileReport, SyncError>>;

/// Requests an immediate reconcile from a running agent.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<ReconcileReply>,
}

impl SyncHandle {
    pub async fn reconcile(&self) -> Result<ReconcileReport, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(reply)
            .await
            .map_err(|_| SyncError::Closed("sync agent"))?;
        rx.await.map_err(|_| SyncError::Closed("sync agent"))?
    }
}

pub struct SyncAgent<T> {
    vault: Arc<OfflineVault>,
    transport: Arc<T>,
    connectivity: watch::Receiver<bool>,
    interval: Duration,
    requests: mpsc::Receiver<ReconcileReply>,
    notices: broadcast::Sender<RevocationNotice>,
}

impl<T: AccessTransport> SyncAgent<T> {
    pub fn new(
        vault: Arc<OfflineVault>,
        transport: Arc<T>,
        connectivity: watch::Receiver<bool>,
        interval: Duration,
    ) -> (Self, SyncHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_CAPACITY);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let agent = Self {
            vault,
            transport,
            connectivity,
            interval,
            requests,
            notices,
        };
        (agent, SyncHandle { tx })
    }

    /// Agent reconciling every `config.sync_interval`.
    pub fn from_config(
        vault: Arc<OfflineVault>,
        transport: Arc<T>,
        connectivity: watch::Receiver<bool>,
        config: &VaultConfig,
    ) -> (Self, SyncHandle) {
        Self::new(vault, transport, connectivity, config.sync_interval)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RevocationNotice> {
        self.notices.subscribe()
    }

    /// Sweep expired entries, then ask the server about the rest and remove
    /// whatever it reports revoked.
    ///
    /// Idempotent: a second pass with no server-side change removes nothing
    /// and emits nothing.
    pub async fn reconcile_now(&self) -> Result<ReconcileReport, SyncError> {
        let expired_swept = self.vault.sweep_expired().await?;

        let local_ids = self.vault.resource_ids()?;
        if local_ids.is_empty() {
            return Ok(ReconcileReport {
                expired_swept,
                ..ReconcileReport::default()
            });
        }

        // The server caps ids per call; nothing is removed until every
        // chunk has been answered.
        let mut response = ReconcileResponse::default();
        for chunk in local_ids.chunks(MAX_RECONCILE_IDS) {
            let part = self.transport.reconcile(chunk).await?;
            response.valid.extend(part.valid);
            response.revoked.extend(part.revoked);
        }
        let requested: HashSet<&str> = local_ids.iter().map(String::as_str).collect();

        let mut removed = Vec::new();
        for resource_id in &response.revoked {
            if !requested.contains(resource_id.as_str()) {
                continue;
            }
            if self.vault.remove(resource_id, RemovalReason::Revoked).await? {
                info!(resource_id = %resource_id, "Removed revoked offline copy");
                let _ = self.notices.send(RevocationNotice {
                    resource_id: resource_id.clone(),
                });
                removed.push(resource_id.clone());
            }
        }

        Ok(ReconcileReport {
            valid: response
                .valid
                .into_iter()
                .filter(|id| requested.contains(id.as_str()))
                .collect(),
            removed,
            expired_swept,
        })
    }

    async fn reconcile_logged(&self) {
        match self.reconcile_now().await {
            Ok(report) => info!(
                valid = report.valid.len(),
                removed = report.removed.len(),
                expired_swept = report.expired_swept,
                "Reconcile complete"
            ),
            Err(e) if e.is_offline() => info!(error = %e, "Reconcile skipped, server unreachable"),
            Err(e) => warn!(error = %e, "Reconcile failed"),
        }
    }

    /// Run the agent loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(agent.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Sync agent starting"
        );

        let mut online = *self.connectivity.borrow_and_update();
        let mut due = online;
        let mut monitor_open = true;
        let mut requests_open = true;

        loop {
            if shutdown.is_cancelled() {
                info!("Sync agent shutting down");
                return;
            }

            if due && online {
                self.reconcile_logged().await;
            }
            due = false;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync agent shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {
                    due = true;
                }
                changed = self.connectivity.changed(), if monitor_open => {
                    match changed {
                        Ok(()) => {
                            let now_online = *self.connectivity.borrow_and_update();
                            due = now_online && !online;
                            online = now_online;
                        }
                        Err(_) => monitor_open = false,
                    }
                }
                request = self.requests.recv(), if requests_open => {
                    match request {
                        Some(reply) => {
                            let _ = reply.send(self.reconcile_now().await);
                        }
                        None => requests_open = false,
                    }
                }
            }
        }
    }
}
