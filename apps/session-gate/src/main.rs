// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wallet_session_gate::{
    api::router,
    clock::SystemClock,
    config::{GateConfig, LogFormat, NONCE_SECRET_ENV},
    maintenance::ExpirySweeper,
    state::{open_backend, AppState},
};

#[tokio::main]
async fn main() {
    let config = GateConfig::from_env().expect("Invalid configuration");

    // Initialize tracing with env filter support (RUST_LOG)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    if config.nonce_secret_generated {
        tracing::warn!(
            "{NONCE_SECRET_ENV} not set; using a random key. Outstanding nonces are invalidated on restart"
        );
    }

    let backend = open_backend(&config).expect("Failed to open session store");
    let state = AppState::from_config(&config, backend, Arc::new(SystemClock))
        .expect("Failed to build application state");

    let shutdown = CancellationToken::new();
    let sweeper = ExpirySweeper::new(state.resolver.clone(), config.sweep_interval);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind");
    tracing::info!(
        addr = %config.bind_addr,
        domain = %config.app_domain,
        "Session gate listening (docs at /docs)"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    shutdown.cancel();
    let _ = sweeper_handle.await;
    tracing::info!("Session gate stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
