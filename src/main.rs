// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use docvault_server::{
    api::router,
    auth::IdentityVerifier,
    clock::SystemClock,
    config::{LogFormat, ServerConfig},
    grants::{seed_grants, DirectoryResourceSource},
    session::SessionManager,
    state::AppState,
    storage::AccessDatabase,
    token::TokenSigner,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time allowed for in-flight requests after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(config.log_format);
    info!(?config, "Configuration loaded");

    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");
    let db = Arc::new(
        AccessDatabase::open(&config.sessions_db_path()).expect("Failed to open session database"),
    );

    if let Some(ref seed) = config.grants_seed_file {
        match seed_grants(&db, seed) {
            Ok(count) => info!(count, path = %seed.display(), "Grants seeded"),
            Err(e) => {
                error!(error = %e, path = %seed.display(), "Failed to load grants seed file");
                std::process::exit(1);
            }
        }
    }

    let signer = TokenSigner::new(config.token_secret.clone())
        .expect("Token secret length was validated by config");
    let sessions = Arc::new(SessionManager::new(
        db.clone(),
        signer,
        db.clone(),
        Arc::new(SystemClock),
        config.policy,
    ));
    let state = AppState::new(
        sessions,
        db.clone(),
        Arc::new(DirectoryResourceSource::new(&config.documents_dir)),
        IdentityVerifier::new(&config.identity),
    )
    .with_data_dir(&config.data_dir);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    });

    match config.tls {
        Some(ref tls) => {
            // Install the ring crypto provider for rustls (must be done before any TLS operations)
            rustls::crypto::ring::default_provider()
                .install_default()
                .expect("Failed to install rustls crypto provider");

            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .expect("Failed to load TLS certificate and key");

            info!(%addr, "DocVault server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTPS server failed");
        }
        None => {
            warn!("TLS_CERT_PATH not set, serving plain HTTP");
            info!(%addr, "DocVault server listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTP server failed");
        }
    }

    info!("Server stopped");
}
