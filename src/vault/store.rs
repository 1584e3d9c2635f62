// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! redb persistence for the offline vault.
//!
//! ```text
//! vault_content    resource_id -> nonce || ciphertext || tag
//! vault_metadata   resource_id -> VaultRecord (JSON)
//! ```
//!
//! Both tables are written and deleted in the same write transaction, so an
//! interrupted store, sweep or reconcile leaves each entry either complete
//! or absent.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::models::WatermarkPayload;
use crate::storage::StoreResult;

const CONTENT: TableDefinition<&str, &[u8]> = TableDefinition::new("vault_content");
const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("vault_metadata");

/// Metadata persisted next to each encrypted document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultRecord {
    pub resource_id: String,
    pub title: String,
    /// Hex SHA-256 of the plaintext.
    pub checksum: String,
    pub offline_token: String,
    pub watermark: WatermarkPayload,
    /// Copied from the offline token at store time.
    pub expires_at: DateTime<Utc>,
    pub downloaded_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Plaintext size.
    pub byte_size: u64,
    /// Identifier of the in-memory key the content was sealed under.
    pub key_id: String,
}

impl VaultRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cheap to clone; clones share the same database.
#[derive(Clone)]
pub struct VaultStore {
    db: Arc<Database>,
}

impl VaultStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Database::create(path)?)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Database::builder().create_with_backend(InMemoryBackend::new())?)
    }

    fn init(db: Database) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CONTENT)?;
            let _ = write_txn.open_table(METADATA)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Insert or replace an entry.
    pub fn put(&self, record: &VaultRecord, sealed: &[u8]) -> StoreResult<()> {
        let json = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut content = write_txn.open_table(CONTENT)?;
            let mut metadata = write_txn.open_table(METADATA)?;
            content.insert(record.resource_id.as_str(), sealed)?;
            metadata.insert(record.resource_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Rewrite only the metadata of an existing entry.
    pub fn update_record(&self, record: &VaultRecord) -> StoreResult<bool> {
        let json = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut metadata = write_txn.open_table(METADATA)?;
            let exists = metadata.get(record.resource_id.as_str())?.is_some();
            if exists {
                metadata.insert(record.resource_id.as_str(), json.as_slice())?;
            }
            exists
        };
        write_txn.commit()?;
        Ok(updated)
    }

    pub fn record(&self, resource_id: &str) -> StoreResult<Option<VaultRecord>> {
        let read_txn = self.db.begin_read()?;
        let metadata = read_txn.open_table(METADATA)?;
        let record = match metadata.get(resource_id)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(record)
    }

    pub fn sealed_content(&self, resource_id: &str) -> StoreResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let content = read_txn.open_table(CONTENT)?;
        let sealed = content.get(resource_id)?.map(|value| value.value().to_vec());
        Ok(sealed)
    }

    /// Remove content and metadata together. Returns whether anything was
    /// removed.
    pub fn remove(&self, resource_id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut content = write_txn.open_table(CONTENT)?;
            let mut metadata = write_txn.open_table(METADATA)?;
            let had_content = content.remove(resource_id)?.is_some();
            let had_metadata = metadata.remove(resource_id)?.is_some();
            had_content || had_metadata
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// All metadata records, in resource id order.
    pub fn records(&self) -> StoreResult<Vec<VaultRecord>> {
        let read_txn = self.db.begin_read()?;
        let metadata = read_txn.open_table(METADATA)?;
        let mut records = Vec::new();
        for item in metadata.iter()? {
            let (_, value) = item?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }
}
