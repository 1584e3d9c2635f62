// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Offline fetch mediation.
//!
//! The application asks [`OfflineMediator::fetch`] for document bytes. When
//! the device is online and the caller holds a viewer token, the network is
//! tried first. If the device is offline, or the server turns out to be
//! unreachable, the request is forwarded over a typed channel to the
//! [`VaultOwner`] task, which answers from the encrypted vault.
//!
//! Errors from a reachable server (revoked, expired session) are returned
//! as-is and never fall back to the vault.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::client::AccessTransport;
use super::SyncError;
use crate::models::WatermarkPayload;
use crate::vault::{OfflineVault, VaultError, VaultMetadata, VaultRead};

const REQUEST_CAPACITY: usize = 32;

/// Where a document request was answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Network(Vec<u8>),
    ServedOffline {
        bytes: Vec<u8>,
        watermark: WatermarkPayload,
    },
    /// No usable offline copy exists.
    UnavailableOffline,
    /// The offline copy's token lapsed; the copy has been deleted.
    Expired,
    /// The offline copy failed integrity checks and was deleted.
    Corrupted,
}

/// Requests served by the vault owner task.
#[derive(Debug)]
pub enum VaultRequest {
    Read {
        resource_id: String,
        reply: oneshot::Sender<Result<VaultRead, VaultError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<VaultMetadata>, VaultError>>,
    },
}

/// Owns the vault on behalf of the mediator.
///
/// Each request runs on its own task so reads of different resources
/// proceed concurrently; same-resource ordering is enforced by the vault's
/// per-resource locks.
pub struct VaultOwner {
    vault: Arc<OfflineVault>,
    requests: mpsc::Receiver<VaultRequest>,
}

/// Cloneable sender side of the vault owner channel.
#[derive(Debug, Clone)]
pub struct MediatorHandle {
    tx: mpsc::Sender<VaultRequest>,
}

impl VaultOwner {
    pub fn new(vault: Arc<OfflineVault>) -> (Self, MediatorHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_CAPACITY);
        (Self { vault, requests }, MediatorHandle { tx })
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Vault owner starting");
        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                request = self.requests.recv() => request,
            };
            let Some(request) = request else {
                info!("Vault owner shutting down");
                return;
            };

            let vault = self.vault.clone();
            tokio::spawn(async move {
                match request {
                    VaultRequest::Read { resource_id, reply } => {
                        let _ = reply.send(vault.read(&resource_id).await);
                    }
                    VaultRequest::List { reply } => {
                        let _ = reply.send(vault.list_metadata());
                    }
                }
            });
        }
    }
}

impl MediatorHandle {
    pub async fn read(&self, resource_id: &str) -> Result<VaultRead, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(VaultRequest::Read {
                resource_id: resource_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| SyncError::Closed("vault owner"))?;
        Ok(rx.await.map_err(|_| SyncError::Closed("vault owner"))??)
    }

    /// Documents currently available offline.
    pub async fn list(&self) -> Result<Vec<VaultMetadata>, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(VaultRequest::List { reply })
            .await
            .map_err(|_| SyncError::Closed("vault owner"))?;
        Ok(rx.await.map_err(|_| SyncError::Closed("vault owner"))??)
    }
}

pub struct OfflineMediator<T> {
    transport: Arc<T>,
    vault: MediatorHandle,
    connectivity: watch::Receiver<bool>,
}

impl<T: AccessTransport> OfflineMediator<T> {
    pub fn new(
        transport: Arc<T>,
        vault: MediatorHandle,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            vault,
            connectivity,
        }
    }

    /// Answer a document request from the network or the vault.
    pub async fn fetch(
        &self,
        resource_id: &str,
        viewer_token: Option<&str>,
    ) -> Result<FetchOutcome, SyncError> {
        let online = *self.connectivity.borrow();
        if let (true, Some(token)) = (online, viewer_token) {
            match self.transport.fetch_document(resource_id, token).await {
                Ok(bytes) => return Ok(FetchOutcome::Network(bytes)),
                Err(e) if e.is_offline() => {
                    debug!(resource_id = %resource_id, error = %e, "Network fetch failed, trying vault");
                }
                Err(e) => return Err(e),
            }
        }

        let outcome = match self.vault.read(resource_id).await {
            Ok(VaultRead::Document(doc)) => FetchOutcome::ServedOffline {
                bytes: doc.bytes,
                watermark: doc.watermark,
            },
            Ok(VaultRead::Expired) => FetchOutcome::Expired,
            Ok(VaultRead::Absent) => FetchOutcome::UnavailableOffline,
            Err(SyncError::Vault(VaultError::AuthFailure)) => FetchOutcome::Corrupted,
            Err(e) => return Err(e),
        };
        debug!(resource_id = %resource_id, outcome = ?OutcomeKind::from(&outcome), "Served from vault");
        Ok(outcome)
    }
}

/// Byte-free view of a [`FetchOutcome`] for logging.
#[derive(Debug)]
enum OutcomeKind {
    Network,
    ServedOffline,
    UnavailableOffline,
    Expired,
    Corrupted,
}

impl From<&FetchOutcome> for OutcomeKind {
    fn from(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Network(_) => OutcomeKind::Network,
            FetchOutcome::ServedOffline { .. } => OutcomeKind::ServedOffline,
            FetchOutcome::UnavailableOffline => OutcomeKind::UnavailableOffline,
            FetchOutcome::Expired => OutcomeKind::Expired,
            FetchOutcome::Corrupted => OutcomeKind::Corrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sync::protocol::ReconcileResponse;
    use crate::sync::ConnectivityMonitor;
    use crate::token::{OfflineClaims, TokenSigner};
    use crate::vault::VaultStore;
    use chrono::{DateTime, Duration, Utc};
    use zeroize::Zeroizing;

    enum Network {
        Serves(Vec<u8>),
        Unreachable,
        Rejects(u16),
    }

    struct FakeServer(Network);

    impl AccessTransport for FakeServer {
        async fn reconcile(&self, _: &[String]) -> Result<ReconcileResponse, SyncError> {
            Ok(ReconcileResponse::default())
        }

        async fn fetch_document(&self, _: &str, _: &str) -> Result<Vec<u8>, SyncError> {
            match &self.0 {
                Network::Serves(bytes) => Ok(bytes.clone()),
                Network::Unreachable => Err(SyncError::Offline("no route".to_string())),
                Network::Rejects(status) => Err(SyncError::Status {
                    status: *status,
                    error_code: Some("revoked".to_string()),
                    message: "access revoked".to_string(),
                }),
            }
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        monitor: ConnectivityMonitor,
        handle: MediatorHandle,
        shutdown: CancellationToken,
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_760_000_000_000).unwrap()
    }

    fn watermark() -> WatermarkPayload {
        WatermarkPayload {
            user_email: "alice@example.com".to_string(),
            purchase_date: start(),
            resource_title: "Harbour Lights".to_string(),
        }
    }

    async fn fixture(online: bool) -> Fixture {
        let clock = Arc::new(ManualClock::new(start()));
        let vault = Arc::new(OfflineVault::new(
            VaultStore::in_memory().unwrap(),
            clock.clone(),
            1 << 20,
        ));
        let signer = TokenSigner::new(Zeroizing::new(vec![5u8; 32])).unwrap();
        let token = signer
            .issue(&OfflineClaims {
                user_id: "alice".to_string(),
                resource_id: "r2".to_string(),
                issued_at: start(),
                expires_at: start() + Duration::days(30),
            })
            .unwrap();
        vault
            .store("r2", b"offline pages", &token, watermark(), "Harbour Lights")
            .await
            .unwrap();

        let (owner, handle) = VaultOwner::new(vault);
        let shutdown = CancellationToken::new();
        tokio::spawn(owner.run(shutdown.clone()));
        Fixture {
            clock,
            monitor: ConnectivityMonitor::new(online),
            handle,
            shutdown,
        }
    }

    fn mediator(f: &Fixture, network: Network) -> OfflineMediator<FakeServer> {
        OfflineMediator::new(
            Arc::new(FakeServer(network)),
            f.handle.clone(),
            f.monitor.subscribe(),
        )
    }

    #[tokio::test]
    async fn online_fetch_uses_network() {
        let f = fixture(true).await;
        let m = mediator(&f, Network::Serves(b"fresh".to_vec()));
        assert_eq!(
            m.fetch("r2", Some("viewer")).await.unwrap(),
            FetchOutcome::Network(b"fresh".to_vec())
        );
    }

    #[tokio::test]
    async fn offline_fetch_serves_vault_copy_with_watermark() {
        let f = fixture(false).await;
        let m = mediator(&f, Network::Serves(b"fresh".to_vec()));
        assert_eq!(
            m.fetch("r2", Some("viewer")).await.unwrap(),
            FetchOutcome::ServedOffline {
                bytes: b"offline pages".to_vec(),
                watermark: watermark(),
            }
        );
        assert_eq!(
            m.fetch("r9", None).await.unwrap(),
            FetchOutcome::UnavailableOffline
        );
    }

    #[tokio::test]
    async fn unreachable_server_falls_back_to_vault() {
        let f = fixture(true).await;
        let m = mediator(&f, Network::Unreachable);
        assert!(matches!(
            m.fetch("r2", Some("viewer")).await.unwrap(),
            FetchOutcome::ServedOffline { .. }
        ));
    }

    #[tokio::test]
    async fn server_rejection_does_not_fall_back() {
        let f = fixture(true).await;
        let m = mediator(&f, Network::Rejects(403));
        assert!(matches!(
            m.fetch("r2", Some("viewer")).await,
            Err(SyncError::Status { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn expired_copy_after_thirty_one_days() {
        let f = fixture(false).await;
        let m = mediator(&f, Network::Unreachable);
        f.clock.advance(Duration::days(31));

        assert_eq!(m.fetch("r2", None).await.unwrap(), FetchOutcome::Expired);
        assert!(f.handle.list().await.unwrap().is_empty());
        assert_eq!(
            m.fetch("r2", None).await.unwrap(),
            FetchOutcome::UnavailableOffline
        );
    }

    #[tokio::test]
    async fn stopped_owner_is_reported() {
        let f = fixture(false).await;
        f.shutdown.cancel();
        // Give the owner a chance to observe cancellation and drop its receiver.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(matches!(
            f.handle.read("r2").await,
            Err(SyncError::Closed(_))
        ));
    }
}
