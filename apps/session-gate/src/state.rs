// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{CookiePolicy, GatePolicy, IdentityResolver, NonceIssuer, ReplayGuard};
use crate::clock::Clock;
use crate::config::{ConfigError, GateConfig, NONCE_SECRET_ENV, SESSION_DB_FILE};
use crate::session::{DurableBackend, MemoryBackend, SessionBackend, SessionStore, StoreResult};

/// Shared state handed to the gate middleware and handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<IdentityResolver>,
    pub policy: Arc<GatePolicy>,
}

impl AppState {
    pub fn new(resolver: IdentityResolver, policy: GatePolicy) -> Self {
        Self {
            resolver: Arc::new(resolver),
            policy: Arc::new(policy),
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(
        config: &GateConfig,
        backend: Arc<dyn SessionBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let sessions = SessionStore::new(
            backend,
            clock.clone(),
            config.session_ttl,
            config.store_timeout,
        );
        let nonces = NonceIssuer::new(&config.nonce_secret, config.nonce_ttl, clock)
            .map_err(|e| ConfigError::InvalidValue(NONCE_SECRET_ENV.to_string(), e.to_string()))?;
        let resolver = IdentityResolver::new(
            sessions,
            nonces,
            ReplayGuard::new(config.nonce_cache_capacity),
            config.app_domain.clone(),
            config.refresh_percent,
        );
        let policy = GatePolicy::new(
            config.login_path.clone(),
            config.home_path.clone(),
            CookiePolicy::new(config.cookie_secure),
        );
        Ok(Self::new(resolver, policy))
    }
}

/// Open the session backend named by the configuration: redb under
/// `DATA_DIR` when set, memory otherwise.
pub fn open_backend(config: &GateConfig) -> StoreResult<Arc<dyn SessionBackend>> {
    match &config.data_dir {
        Some(dir) => {
            let path = dir.join(SESSION_DB_FILE);
            tracing::info!(path = %path.display(), "Using persistent session store");
            Ok(Arc::new(DurableBackend::open(&path)?))
        }
        None => {
            tracing::warn!("DATA_DIR not set; sessions are kept in memory and lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
