// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Offline Vault
//!
//! Client-side encrypted store for documents downloaded for offline
//! reading.
//!
//! Each entry holds the document sealed with AES-256-GCM under the
//! in-memory [`VaultKeyring`] key, a SHA-256 checksum of the plaintext, the
//! signed offline token that bounds how long the copy may be kept, and the
//! watermark payload to render with.
//!
//! ## Read path
//!
//! 1. Expired per the stored token: delete, return [`VaultRead::Expired`].
//! 2. Sealed under a key this process no longer has: delete, return
//!    [`VaultRead::Absent`].
//! 3. Decrypt and verify the checksum. Any failure deletes the entry, is
//!    written to the security log and returns [`VaultError::AuthFailure`].
//! 4. Update `last_accessed_at` and return the plaintext.
//!
//! Operations on one resource id are serialized by [`ResourceLocks`].
//! Encryption, hashing and redb transactions run on the blocking pool.

pub mod keyring;
pub mod locks;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::VaultConfig;
use crate::crypto;
use crate::error::SECURITY_LOG_TARGET;
use crate::models::WatermarkPayload;
use crate::storage::StoreError;
use crate::token::{self, OfflineClaims};

pub use keyring::VaultKeyring;
pub use locks::ResourceLocks;
pub use store::{VaultRecord, VaultStore};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("offline token is malformed")]
    InvalidToken,

    #[error("offline token covers {token_resource}, not {resource_id}")]
    TokenMismatch {
        resource_id: String,
        token_resource: String,
    },

    #[error("offline token already expired")]
    AlreadyExpired,

    #[error("storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    /// Decryption or checksum verification failed. The entry was removed.
    #[error("stored document failed integrity verification")]
    AuthFailure,

    #[error("encryption failed")]
    Encrypt,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Listing view of an entry. Never contains document bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultMetadata {
    pub resource_id: String,
    pub title: String,
    pub watermark: WatermarkPayload,
    pub downloaded_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub byte_size: u64,
}

impl From<&VaultRecord> for VaultMetadata {
    fn from(record: &VaultRecord) -> Self {
        Self {
            resource_id: record.resource_id.clone(),
            title: record.title.clone(),
            watermark: record.watermark.clone(),
            downloaded_at: record.downloaded_at,
            last_accessed_at: record.last_accessed_at,
            expires_at: record.expires_at,
            byte_size: record.byte_size,
        }
    }
}

/// Decrypted document ready for the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultDocument {
    pub bytes: Vec<u8>,
    pub watermark: WatermarkPayload,
    pub metadata: VaultMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultRead {
    Document(VaultDocument),
    /// The offline token lapsed; the entry has been deleted.
    Expired,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Deleted,
    Expired,
    Revoked,
    Corrupted,
    KeyLost,
}

/// Change notification for "available offline" indicators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Stored { resource_id: String },
    Removed { resource_id: String, reason: RemovalReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSummary {
    pub count: usize,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

pub struct OfflineVault {
    store: VaultStore,
    keyring: VaultKeyring,
    locks: ResourceLocks,
    /// Held across the quota check and the write that consumes it.
    quota: Mutex<()>,
    clock: Arc<dyn Clock>,
    quota_bytes: u64,
    events: broadcast::Sender<VaultEvent>,
}

/// Result of opening sealed content off the async executor.
enum Opened {
    Plaintext(Vec<u8>),
    Tampered(&'static str),
}

impl OfflineVault {
    pub fn new(store: VaultStore, clock: Arc<dyn Clock>, quota_bytes: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            keyring: VaultKeyring::new(),
            locks: ResourceLocks::new(),
            quota: Mutex::new(()),
            clock,
            quota_bytes,
            events,
        }
    }

    /// Open the on-disk vault described by `config`.
    pub fn open(config: &VaultConfig, clock: Arc<dyn Clock>) -> Result<Self, VaultError> {
        let store = VaultStore::open(&config.db_path)?;
        Ok(Self::new(store, clock, config.quota_bytes))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    pub fn keyring(&self) -> &VaultKeyring {
        &self.keyring
    }

    fn emit(&self, event: VaultEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run cipher work and redb transactions on the blocking pool.
    async fn blocking<T, F>(&self, work: F) -> Result<T, VaultError>
    where
        F: FnOnce(&VaultStore) -> Result<T, VaultError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    // =========================================================================
    // Store
    // =========================================================================

    /// Encrypt and persist a document with its offline token.
    pub async fn store(
        &self,
        resource_id: &str,
        bytes: &[u8],
        offline_token: &str,
        watermark: WatermarkPayload,
        title: &str,
    ) -> Result<VaultMetadata, VaultError> {
        let claims: OfflineClaims =
            token::peek(offline_token).map_err(|_| VaultError::InvalidToken)?;
        if claims.resource_id != resource_id {
            return Err(VaultError::TokenMismatch {
                resource_id: resource_id.to_string(),
                token_resource: claims.resource_id,
            });
        }

        let _guard = self.locks.acquire(resource_id).await;
        let now = self.clock.now();
        if now >= claims.expires_at {
            return Err(VaultError::AlreadyExpired);
        }

        let key = self.keyring.current();
        let key_id = key.key_id.clone();
        let plaintext = bytes.to_vec();
        let (sealed, checksum) = self
            .blocking(move |_| {
                let sealed =
                    crypto::encrypt(&key.key, &plaintext).map_err(|_| VaultError::Encrypt)?;
                Ok((sealed, crypto::checksum(&plaintext)))
            })
            .await?;

        let record = VaultRecord {
            resource_id: resource_id.to_string(),
            title: title.to_string(),
            checksum,
            offline_token: offline_token.to_string(),
            watermark,
            expires_at: claims.expires_at,
            downloaded_at: now,
            last_accessed_at: now,
            byte_size: bytes.len() as u64,
            key_id,
        };

        let quota_bytes = self.quota_bytes;
        let _quota = self.quota.lock().await;
        let record = self
            .blocking(move |store| {
                let needed = record.byte_size;
                let used: u64 = store
                    .records()?
                    .iter()
                    .filter(|r| r.resource_id != record.resource_id && !r.is_expired(now))
                    .map(|r| r.byte_size)
                    .sum();
                let available = quota_bytes.saturating_sub(used);
                if needed > available {
                    return Err(VaultError::QuotaExceeded { needed, available });
                }
                store.put(&record, &sealed)?;
                Ok(record)
            })
            .await?;

        info!(
            resource_id = %resource_id,
            byte_size = record.byte_size,
            expires_at = %record.expires_at,
            "Stored document for offline use"
        );
        self.emit(VaultEvent::Stored {
            resource_id: resource_id.to_string(),
        });
        Ok(VaultMetadata::from(&record))
    }

    // =========================================================================
    // Read
    // =========================================================================

    pub async fn read(&self, resource_id: &str) -> Result<VaultRead, VaultError> {
        let _guard = self.locks.acquire(resource_id).await;
        let now = self.clock.now();

        let id = resource_id.to_string();
        let (record, sealed) = self
            .blocking(move |store| Ok((store.record(&id)?, store.sealed_content(&id)?)))
            .await?;
        let Some(mut record) = record else {
            return Ok(VaultRead::Absent);
        };

        if record.is_expired(now) {
            self.remove_locked(resource_id, RemovalReason::Expired).await?;
            debug!(resource_id = %resource_id, "Offline copy expired on read");
            return Ok(VaultRead::Expired);
        }

        if self.keyring.current_id().as_deref() != Some(record.key_id.as_str()) {
            self.remove_locked(resource_id, RemovalReason::KeyLost).await?;
            info!(resource_id = %resource_id, "Offline copy sealed under a lost key; removed");
            return Ok(VaultRead::Absent);
        }

        let Some(sealed) = sealed else {
            self.remove_locked(resource_id, RemovalReason::Corrupted).await?;
            return Ok(VaultRead::Absent);
        };

        let key = self.keyring.current();
        let expected = record.checksum.clone();
        let opened = self
            .blocking(move |_| {
                Ok(match crypto::decrypt(&key.key, &sealed) {
                    Ok(plaintext) if crypto::verify_checksum(&plaintext, &expected) => {
                        Opened::Plaintext(plaintext)
                    }
                    Ok(_) => Opened::Tampered("checksum mismatch"),
                    Err(_) => Opened::Tampered("decryption failed"),
                })
            })
            .await?;
        let plaintext = match opened {
            Opened::Plaintext(plaintext) => plaintext,
            Opened::Tampered(detail) => {
                return Err(self.integrity_failure(resource_id, detail).await);
            }
        };

        record.last_accessed_at = now;
        let touched = record.clone();
        self.blocking(move |store| Ok(store.update_record(&touched)?))
            .await?;

        Ok(VaultRead::Document(VaultDocument {
            bytes: plaintext,
            watermark: record.watermark.clone(),
            metadata: VaultMetadata::from(&record),
        }))
    }

    async fn integrity_failure(&self, resource_id: &str, detail: &str) -> VaultError {
        warn!(
            target: SECURITY_LOG_TARGET,
            resource_id = %resource_id,
            detail = %detail,
            "Offline copy failed integrity verification"
        );
        if let Err(e) = self.remove_locked(resource_id, RemovalReason::Corrupted).await {
            warn!(resource_id = %resource_id, error = %e, "Failed to remove corrupted entry");
        }
        VaultError::AuthFailure
    }

    // =========================================================================
    // Delete / sweep
    // =========================================================================

    /// Remove an entry on user request.
    pub async fn delete(&self, resource_id: &str) -> Result<bool, VaultError> {
        self.remove(resource_id, RemovalReason::Deleted).await
    }

    pub async fn remove(
        &self,
        resource_id: &str,
        reason: RemovalReason,
    ) -> Result<bool, VaultError> {
        let _guard = self.locks.acquire(resource_id).await;
        self.remove_locked(resource_id, reason).await
    }

    /// Caller holds the resource lock.
    async fn remove_locked(
        &self,
        resource_id: &str,
        reason: RemovalReason,
    ) -> Result<bool, VaultError> {
        let id = resource_id.to_string();
        let removed = self.blocking(move |store| Ok(store.remove(&id)?)).await?;
        if removed {
            self.emit(VaultEvent::Removed {
                resource_id: resource_id.to_string(),
                reason,
            });
        }
        Ok(removed)
    }

    async fn current_record(&self, resource_id: &str) -> Result<Option<VaultRecord>, VaultError> {
        let id = resource_id.to_string();
        self.blocking(move |store| Ok(store.record(&id)?)).await
    }

    /// Delete every expired entry. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize, VaultError> {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .blocking(|store| Ok(store.records()?))
            .await?
            .into_iter()
            .filter(|r| r.is_expired(now))
            .map(|r| r.resource_id)
            .collect();

        let mut removed = 0;
        for resource_id in expired {
            let _guard = self.locks.acquire(&resource_id).await;
            // Re-check under the lock; a concurrent store may have replaced it.
            let still_expired = self
                .current_record(&resource_id)
                .await?
                .is_some_and(|r| r.is_expired(self.clock.now()));
            if still_expired
                && self
                    .remove_locked(&resource_id, RemovalReason::Expired)
                    .await?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept expired offline copies");
        }
        Ok(removed)
    }

    /// Delete entries sealed under a key other than the current one.
    pub async fn purge_foreign_entries(&self) -> Result<usize, VaultError> {
        let current = self.keyring.current().key_id;
        let foreign: Vec<String> = self
            .blocking(|store| Ok(store.records()?))
            .await?
            .into_iter()
            .filter(|r| r.key_id != current)
            .map(|r| r.resource_id)
            .collect();

        let mut removed = 0;
        for resource_id in foreign {
            let _guard = self.locks.acquire(&resource_id).await;
            let still_foreign = self
                .current_record(&resource_id)
                .await?
                .is_some_and(|r| r.key_id != current);
            if still_foreign
                && self
                    .remove_locked(&resource_id, RemovalReason::KeyLost)
                    .await?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Purged offline copies from a previous vault key");
        }
        Ok(removed)
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Metadata of non-expired entries, most recently downloaded first.
    pub fn list_metadata(&self) -> Result<Vec<VaultMetadata>, VaultError> {
        let now = self.clock.now();
        let mut listing: Vec<VaultMetadata> = self
            .store
            .records()?
            .iter()
            .filter(|r| !r.is_expired(now))
            .map(VaultMetadata::from)
            .collect();
        listing.sort_by(|a, b| b.downloaded_at.cmp(&a.downloaded_at));
        Ok(listing)
    }

    /// Totals over non-expired entries.
    pub fn storage_summary(&self) -> Result<StorageSummary, VaultError> {
        let now = self.clock.now();
        let (count, total_bytes) = self
            .store
            .records()?
            .iter()
            .filter(|r| !r.is_expired(now))
            .fold((0usize, 0u64), |(count, total), r| {
                (count + 1, total.saturating_add(r.byte_size))
            });
        Ok(StorageSummary {
            count,
            total_bytes,
            available_bytes: self.quota_bytes.saturating_sub(total_bytes),
        })
    }

    /// Every stored resource id, expired or not.
    pub fn resource_ids(&self) -> Result<Vec<String>, VaultError> {
        Ok(self
            .store
            .records()?
            .into_iter()
            .map(|r| r.resource_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::token::TokenSigner;
    use chrono::Duration;
    use zeroize::Zeroizing;

    struct Fixture {
        vault: OfflineVault,
        clock: Arc<ManualClock>,
        signer: TokenSigner,
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_760_000_000_000).unwrap()
    }

    fn fixture(quota: u64) -> Fixture {
        let clock = Arc::new(ManualClock::new(start()));
        let vault = OfflineVault::new(VaultStore::in_memory().unwrap(), clock.clone(), quota);
        let signer = TokenSigner::new(Zeroizing::new(vec![9u8; 32])).unwrap();
        Fixture {
            vault,
            clock,
            signer,
        }
    }

    fn offline_token(f: &Fixture, resource: &str, ttl: Duration) -> String {
        let now = f.clock.now();
        f.signer
            .issue(&OfflineClaims {
                user_id: "alice".to_string(),
                resource_id: resource.to_string(),
                issued_at: now,
                expires_at: now + ttl,
            })
            .unwrap()
    }

    fn watermark(title: &str) -> WatermarkPayload {
        WatermarkPayload {
            user_email: "alice@example.com".to_string(),
            purchase_date: start() - Duration::days(2),
            resource_title: title.to_string(),
        }
    }

    async fn store(f: &Fixture, resource: &str, bytes: &[u8], ttl: Duration) -> VaultMetadata {
        let token = offline_token(f, resource, ttl);
        f.vault
            .store(resource, bytes, &token, watermark(resource), resource)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn read_returns_plaintext_and_touches() {
        let f = fixture(1024);
        store(&f, "r1", b"chapter one", Duration::days(30)).await;
        f.clock.advance(Duration::hours(2));

        let VaultRead::Document(doc) = f.vault.read("r1").await.unwrap() else {
            panic!("expected document");
        };
        assert_eq!(doc.bytes, b"chapter one");
        assert_eq!(doc.watermark, watermark("r1"));
        assert_eq!(doc.metadata.last_accessed_at, start() + Duration::hours(2));
        assert_eq!(f.vault.read("missing").await.unwrap(), VaultRead::Absent);
    }

    #[tokio::test]
    async fn one_millisecond_token_expires() {
        let f = fixture(1024);
        store(&f, "r1", b"short lived", Duration::milliseconds(1)).await;
        f.clock.advance(Duration::milliseconds(1));

        assert!(f.vault.list_metadata().unwrap().is_empty());
        assert_eq!(f.vault.read("r1").await.unwrap(), VaultRead::Expired);
        assert!(f.vault.resource_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn thirty_day_copy_expires_after_thirty_one_days() {
        let f = fixture(1024);
        store(&f, "r2", b"offline body", Duration::days(30)).await;

        f.clock.advance(Duration::days(29));
        match f.vault.read("r2").await.unwrap() {
            VaultRead::Document(doc) => assert_eq!(doc.watermark.resource_title, "r2"),
            other => panic!("expected document, got {other:?}"),
        }

        f.clock.advance(Duration::days(2));
        assert!(f.vault.list_metadata().unwrap().is_empty());
        assert_eq!(f.vault.read("r2").await.unwrap(), VaultRead::Expired);
    }

    #[tokio::test]
    async fn tampered_content_is_auth_failure_and_removed() {
        let f = fixture(1024);
        store(&f, "r1", b"chapter one", Duration::days(30)).await;

        let mut sealed = f.vault.store.sealed_content("r1").unwrap().unwrap();
        sealed[crypto::NONCE_SIZE] ^= 0x01;
        let record = f.vault.store.record("r1").unwrap().unwrap();
        f.vault.store.put(&record, &sealed).unwrap();

        let mut events = f.vault.subscribe();
        assert!(matches!(
            f.vault.read("r1").await,
            Err(VaultError::AuthFailure)
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            VaultEvent::Removed {
                resource_id: "r1".to_string(),
                reason: RemovalReason::Corrupted
            }
        );
        assert_eq!(f.vault.read("r1").await.unwrap(), VaultRead::Absent);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_auth_failure() {
        let f = fixture(1024);
        store(&f, "r1", b"chapter one", Duration::days(30)).await;
        let mut record = f.vault.store.record("r1").unwrap().unwrap();
        record.checksum = crypto::checksum(b"something else");
        f.vault.store.update_record(&record).unwrap();

        assert!(matches!(
            f.vault.read("r1").await,
            Err(VaultError::AuthFailure)
        ));
    }

    #[tokio::test]
    async fn lost_key_reads_absent_and_purges() {
        let f = fixture(1024);
        store(&f, "r1", b"one", Duration::days(30)).await;
        store(&f, "r2", b"two", Duration::days(30)).await;

        f.vault.keyring().forget();
        assert_eq!(f.vault.read("r1").await.unwrap(), VaultRead::Absent);
        assert_eq!(f.vault.purge_foreign_entries().await.unwrap(), 1);
        assert!(f.vault.resource_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_validates_token() {
        let f = fixture(1024);
        let token = offline_token(&f, "r1", Duration::days(30));
        assert!(matches!(
            f.vault.store("r2", b"x", &token, watermark("r2"), "r2").await,
            Err(VaultError::TokenMismatch { .. })
        ));
        assert!(matches!(
            f.vault.store("r1", b"x", "garbage", watermark("r1"), "r1").await,
            Err(VaultError::InvalidToken)
        ));

        let stale = offline_token(&f, "r1", Duration::seconds(1));
        f.clock.advance(Duration::seconds(1));
        assert!(matches!(
            f.vault.store("r1", b"x", &stale, watermark("r1"), "r1").await,
            Err(VaultError::AlreadyExpired)
        ));
    }

    #[tokio::test]
    async fn quota_and_summary() {
        let f = fixture(100);
        store(&f, "r1", &[1u8; 60], Duration::days(30)).await;

        let token = offline_token(&f, "r2", Duration::days(30));
        assert!(matches!(
            f.vault.store("r2", &[2u8; 50], &token, watermark("r2"), "r2").await,
            Err(VaultError::QuotaExceeded { needed: 50, available: 40 })
        ));

        // Replacing an entry does not count its old size.
        store(&f, "r1", &[1u8; 90], Duration::days(30)).await;

        let summary = f.vault.storage_summary().unwrap();
        assert_eq!(
            summary,
            StorageSummary {
                count: 1,
                total_bytes: 90,
                available_bytes: 10
            }
        );
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let f = fixture(1024);
        store(&f, "short", b"a", Duration::hours(1)).await;
        store(&f, "long", b"b", Duration::days(30)).await;
        f.clock.advance(Duration::hours(2));

        assert_eq!(f.vault.sweep_expired().await.unwrap(), 1);
        assert_eq!(f.vault.resource_ids().unwrap(), vec!["long".to_string()]);
        assert_eq!(f.vault.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_emits_event() {
        let f = fixture(1024);
        let mut events = f.vault.subscribe();
        store(&f, "r1", b"a", Duration::days(1)).await;
        assert!(f.vault.delete("r1").await.unwrap());
        assert!(!f.vault.delete("r1").await.unwrap());

        assert_eq!(
            events.recv().await.unwrap(),
            VaultEvent::Stored {
                resource_id: "r1".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            VaultEvent::Removed {
                resource_id: "r1".to_string(),
                reason: RemovalReason::Deleted
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_stores_share_one_quota() {
        let f = fixture(100);
        let first = offline_token(&f, "r1", Duration::days(30));
        let second = offline_token(&f, "r2", Duration::days(30));

        let (a, b) = tokio::join!(
            f.vault.store("r1", &[1u8; 60], &first, watermark("r1"), "r1"),
            f.vault.store("r2", &[2u8; 60], &second, watermark("r2"), "r2"),
        );
        let over_quota = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(VaultError::QuotaExceeded { needed: 60, available: 40 })))
            .count();
        assert_eq!(over_quota, 1);
        assert!(a.is_ok() || b.is_ok());
        assert_eq!(f.vault.storage_summary().unwrap().total_bytes, 60);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn store_racing_remove_leaves_entry_whole_or_gone() {
        let f = fixture(1 << 20);
        for round in 0..25u8 {
            let token = offline_token(&f, "r1", Duration::days(30));
            let body = vec![round; 4096];
            let (stored, removed) = tokio::join!(
                f.vault.store("r1", &body, &token, watermark("r1"), "r1"),
                f.vault.remove("r1", RemovalReason::Revoked),
            );
            stored.unwrap();
            removed.unwrap();

            let record = f.vault.store.record("r1").unwrap();
            let sealed = f.vault.store.sealed_content("r1").unwrap();
            assert_eq!(record.is_some(), sealed.is_some(), "round {round}");
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn large_documents_do_not_stall_other_tasks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let f = fixture(64 << 20);
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let body = vec![0x5au8; 32 << 20];
        store(&f, "big", &body, Duration::days(30)).await;
        let VaultRead::Document(doc) = f.vault.read("big").await.unwrap() else {
            panic!("expected document");
        };
        ticker.abort();

        assert_eq!(doc.bytes.len(), body.len());
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn open_uses_config_path_and_quota() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = VaultConfig::new(temp.path().join("vault").join("offline.redb"));
        config.quota_bytes = 10;
        let clock = Arc::new(ManualClock::new(start()));

        let vault = OfflineVault::open(&config, clock).unwrap();
        assert_eq!(vault.storage_summary().unwrap().available_bytes, 10);
        assert!(config.db_path.exists());
    }
}
