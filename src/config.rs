// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! typed configuration loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TOKEN_SECRET` | Hex HMAC secret for viewer/offline tokens (>= 32 bytes) | Required |
//! | `IDENTITY_JWT_SECRET` | HS256 secret of the identity provider | Required |
//! | `IDENTITY_ISSUER` | Expected JWT issuer claim | Unchecked |
//! | `IDENTITY_AUDIENCE` | Expected JWT audience claim | Unchecked |
//! | `DATA_DIR` | Directory holding `sessions.redb` | `./data` |
//! | `DOCUMENTS_DIR` | Directory of protected document files | `$DATA_DIR/documents` |
//! | `GRANTS_SEED_FILE` | JSON array of grants loaded at startup | None |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate chain and key | Plain HTTP |
//! | `VIEWER_TOKEN_TTL_SECS` | Viewer token lifetime | `1800` |
//! | `TOKEN_ROTATION_SECS` | Rotation interval | `900` |
//! | `SESSION_MAX_IDLE_SECS` | Idle timeout | `1800` |
//! | `OFFLINE_TOKEN_TTL_DAYS` | Offline token lifetime | `30` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;

use chrono::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::token::MIN_SECRET_LEN;

pub const TOKEN_SECRET_ENV: &str = "TOKEN_SECRET";
pub const IDENTITY_JWT_SECRET_ENV: &str = "IDENTITY_JWT_SECRET";
pub const IDENTITY_ISSUER_ENV: &str = "IDENTITY_ISSUER";
pub const IDENTITY_AUDIENCE_ENV: &str = "IDENTITY_AUDIENCE";

/// Environment variable name for the data directory path.
///
/// # Default
/// `./data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DOCUMENTS_DIR_ENV: &str = "DOCUMENTS_DIR";
pub const GRANTS_SEED_FILE_ENV: &str = "GRANTS_SEED_FILE";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const VIEWER_TOKEN_TTL_ENV: &str = "VIEWER_TOKEN_TTL_SECS";
pub const TOKEN_ROTATION_ENV: &str = "TOKEN_ROTATION_SECS";
pub const SESSION_MAX_IDLE_ENV: &str = "SESSION_MAX_IDLE_SECS";
pub const OFFLINE_TOKEN_TTL_ENV: &str = "OFFLINE_TOKEN_TTL_DAYS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_VIEWER_TOKEN_TTL_SECS: i64 = 30 * 60;
pub const DEFAULT_TOKEN_ROTATION_SECS: i64 = 15 * 60;
pub const DEFAULT_SESSION_MAX_IDLE_SECS: i64 = 30 * 60;
pub const DEFAULT_OFFLINE_TOKEN_TTL_DAYS: i64 = 30;

/// Default client vault quota (500 MiB).
pub const DEFAULT_VAULT_QUOTA_BYTES: u64 = 500 * 1024 * 1024;
/// Default interval between periodic reconciles while online.
pub const DEFAULT_SYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{var} must decode to at least {min} bytes, got {len}")]
    WeakSecret {
        var: &'static str,
        len: usize,
        min: usize,
    },
}

/// Timing rules for viewer sessions and offline tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub viewer_token_ttl: Duration,
    /// A token older than this is replaced on the next heartbeat or page view.
    pub rotation_interval: Duration,
    pub max_idle: Duration,
    pub offline_token_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            viewer_token_ttl: Duration::seconds(DEFAULT_VIEWER_TOKEN_TTL_SECS),
            rotation_interval: Duration::seconds(DEFAULT_TOKEN_ROTATION_SECS),
            max_idle: Duration::seconds(DEFAULT_SESSION_MAX_IDLE_SECS),
            offline_token_ttl: Duration::days(DEFAULT_OFFLINE_TOKEN_TTL_DAYS),
        }
    }
}

/// Identity provider JWT verification settings.
pub struct IdentityConfig {
    pub jwt_secret: Zeroizing<Vec<u8>>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Server configuration.
pub struct ServerConfig {
    pub token_secret: Zeroizing<Vec<u8>>,
    pub identity: IdentityConfig,
    pub data_dir: PathBuf,
    pub documents_dir: PathBuf,
    pub grants_seed_file: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsPaths>,
    pub policy: SessionPolicy,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("identity", &self.identity)
            .field("data_dir", &self.data_dir)
            .field("documents_dir", &self.documents_dir)
            .field("grants_seed_file", &self.grants_seed_file)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("policy", &self.policy)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token_secret = {
            let raw = get(TOKEN_SECRET_ENV).ok_or(ConfigError::Missing(TOKEN_SECRET_ENV))?;
            let bytes = hex::decode(raw.trim()).map_err(|e| ConfigError::Invalid {
                var: TOKEN_SECRET_ENV,
                reason: e.to_string(),
            })?;
            if bytes.len() < MIN_SECRET_LEN {
                return Err(ConfigError::WeakSecret {
                    var: TOKEN_SECRET_ENV,
                    len: bytes.len(),
                    min: MIN_SECRET_LEN,
                });
            }
            Zeroizing::new(bytes)
        };

        let identity = IdentityConfig {
            jwt_secret: Zeroizing::new(
                get(IDENTITY_JWT_SECRET_ENV)
                    .ok_or(ConfigError::Missing(IDENTITY_JWT_SECRET_ENV))?
                    .into_bytes(),
            ),
            issuer: get(IDENTITY_ISSUER_ENV),
            audience: get(IDENTITY_AUDIENCE_ENV),
        };

        let data_dir = PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let documents_dir = get(DOCUMENTS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("documents"));

        let port = match get(PORT_ENV) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                var: PORT_ENV,
                reason: format!("not a port number: {raw}"),
            })?,
            None => DEFAULT_PORT,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_PATH_ENV)),
        };

        let policy = SessionPolicy {
            viewer_token_ttl: Duration::seconds(positive(
                &get,
                VIEWER_TOKEN_TTL_ENV,
                DEFAULT_VIEWER_TOKEN_TTL_SECS,
            )?),
            rotation_interval: Duration::seconds(positive(
                &get,
                TOKEN_ROTATION_ENV,
                DEFAULT_TOKEN_ROTATION_SECS,
            )?),
            max_idle: Duration::seconds(positive(
                &get,
                SESSION_MAX_IDLE_ENV,
                DEFAULT_SESSION_MAX_IDLE_SECS,
            )?),
            offline_token_ttl: Duration::days(positive(
                &get,
                OFFLINE_TOKEN_TTL_ENV,
                DEFAULT_OFFLINE_TOKEN_TTL_DAYS,
            )?),
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            token_secret,
            identity,
            data_dir,
            documents_dir,
            grants_seed_file: get(GRANTS_SEED_FILE_ENV).map(PathBuf::from),
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.into()),
            port,
            tls,
            policy,
            log_format,
        })
    }

    pub fn sessions_db_path(&self) -> PathBuf {
        self.data_dir.join("sessions.redb")
    }
}

fn positive(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: i64,
) -> Result<i64, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(ConfigError::Invalid {
                var,
                reason: format!("expected a positive integer, got {raw}"),
            }),
        },
    }
}

/// Client-side vault settings.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub db_path: PathBuf,
    pub quota_bytes: u64,
    pub sync_interval: std::time::Duration,
}

impl VaultConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            quota_bytes: DEFAULT_VAULT_QUOTA_BYTES,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn secret() -> String {
        "ab".repeat(32)
    }

    #[test]
    fn missing_token_secret_is_fatal() {
        let err = ServerConfig::from_lookup(lookup(&[(IDENTITY_JWT_SECRET_ENV, "idp")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(TOKEN_SECRET_ENV));
    }

    #[test]
    fn short_token_secret_is_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[
            (TOKEN_SECRET_ENV, "abcd"),
            (IDENTITY_JWT_SECRET_ENV, "idp"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::WeakSecret { len: 2, .. }));
    }

    #[test]
    fn defaults_apply() {
        let s = secret();
        let config = ServerConfig::from_lookup(lookup(&[
            (TOKEN_SECRET_ENV, s.as_str()),
            (IDENTITY_JWT_SECRET_ENV, "idp"),
        ]))
        .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.policy, SessionPolicy::default());
        assert_eq!(config.documents_dir, PathBuf::from("./data/documents"));
        assert!(config.tls.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_and_half_tls_config() {
        let s = secret();
        let config = ServerConfig::from_lookup(lookup(&[
            (TOKEN_SECRET_ENV, s.as_str()),
            (IDENTITY_JWT_SECRET_ENV, "idp"),
            (TOKEN_ROTATION_ENV, "60"),
            (PORT_ENV, "9000"),
            (LOG_FORMAT_ENV, "json"),
        ]))
        .unwrap();
        assert_eq!(config.policy.rotation_interval, Duration::seconds(60));
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_format, LogFormat::Json);

        let err = ServerConfig::from_lookup(lookup(&[
            (TOKEN_SECRET_ENV, s.as_str()),
            (IDENTITY_JWT_SECRET_ENV, "idp"),
            (TLS_CERT_PATH_ENV, "/tmp/cert.pem"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing(TLS_KEY_PATH_ENV));
    }

    #[test]
    fn zero_durations_are_invalid() {
        let s = secret();
        let err = ServerConfig::from_lookup(lookup(&[
            (TOKEN_SECRET_ENV, s.as_str()),
            (IDENTITY_JWT_SECRET_ENV, "idp"),
            (SESSION_MAX_IDLE_ENV, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: SESSION_MAX_IDLE_ENV, .. }));
    }
}
