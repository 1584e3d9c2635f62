// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Volatile vault key.
//!
//! The key lives only in process memory and is never written to disk or
//! sent anywhere. When it is missing (first use, restart, explicit wipe) a
//! new one is generated under a fresh key id, and entries sealed under any
//! other id become unreadable.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::crypto::VaultKey;

#[derive(Clone)]
pub struct KeyHandle {
    pub key_id: String,
    pub key: Arc<VaultKey>,
}

#[derive(Default)]
pub struct VaultKeyring {
    current: RwLock<Option<KeyHandle>>,
}

impl VaultKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current key, generating one if absent.
    pub fn current(&self) -> KeyHandle {
        if let Some(handle) = self
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return handle.clone();
        }

        let mut slot = self.current.write().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert_with(|| {
            let key_id = Uuid::new_v4().to_string();
            tracing::info!(key_id = %key_id, "Generated new vault key");
            KeyHandle {
                key_id,
                key: Arc::new(VaultKey::generate()),
            }
        })
        .clone()
    }

    /// Id of the current key without generating one.
    pub fn current_id(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|handle| handle.key_id.clone())
    }

    /// Drop the key. Every existing entry becomes unreadable.
    pub fn forget(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl std::fmt::Debug for VaultKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeyring")
            .field("key_id", &self.current_id())
            .finish()
    }
}
