// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Sync & Revocation
//!
//! Client-side components that keep the offline vault consistent with the
//! server's grants:
//!
//! - [`agent::SyncAgent`]: reconciles local resource ids against the server
//!   periodically, on every offline to online transition and on demand,
//!   deleting revoked entries and announcing each removal once.
//! - [`mediator::OfflineMediator`]: answers document fetches from the network
//!   when possible and from the vault when offline, talking to the
//!   [`mediator::VaultOwner`] task over a typed channel.
//! - [`client::HttpAccessClient`]: reqwest transport to the access server.
//! - [`protocol`]: reconcile wire types and the server-side partition.

pub mod agent;
pub mod client;
pub mod mediator;
pub mod protocol;

use thiserror::Error;
use tokio::sync::watch;

use crate::vault::VaultError;

pub use agent::{ReconcileReport, RevocationNotice, SyncAgent, SyncHandle};
pub use client::{AccessTransport, HttpAccessClient};
pub use mediator::{FetchOutcome, MediatorHandle, OfflineMediator, VaultOwner};
pub use protocol::{ReconcileRequest, ReconcileResponse};

#[derive(Debug, Error)]
pub enum SyncError {
    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status {
        status: u16,
        error_code: Option<String>,
        message: String,
    },

    #[error("invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    /// The task on the other side of a channel has stopped.
    #[error("{0} is not running")]
    Closed(&'static str),
}

impl SyncError {
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            SyncError::Offline(e.to_string())
        } else {
            SyncError::Http(e)
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::Offline(_))
    }
}

/// Publishes the device's network reachability.
///
/// Whatever observes the network (OS callbacks, failed requests) calls
/// [`ConnectivityMonitor::set_online`]; the agent and mediator subscribe.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Returns true when the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
