// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Expiry Sweeper
//!
//! Background task that reclaims space held by expired sessions and stale
//! replay guard entries.
//!
//! Expiry is enforced lazily on every read, so nothing depends on this task
//! for correctness. Without it, expired records would only leave the store
//! on logout.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::IdentityResolver;

pub struct ExpirySweeper {
    resolver: Arc<IdentityResolver>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(resolver: Arc<IdentityResolver>, interval: Duration) -> Self {
        Self { resolver, interval }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Expiry sweeper starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Expiry sweeper shutting down");
                    return;
                }
            }

            self.sweep_step().await;
        }
    }

    /// One pass: prune the replay guard, then expired sessions.
    pub async fn sweep_step(&self) {
        let pruned = self
            .resolver
            .replay_guard()
            .prune(self.resolver.now());

        match self.resolver.sessions().sweep_expired().await {
            Ok(removed) => {
                if removed > 0 || pruned > 0 {
                    debug!(sessions = removed, nonces = pruned, "Expiry sweep complete");
                }
            }
            Err(e) => warn!(error = %e, "Expired session sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};

    use crate::auth::{NonceIssuer, ReplayGuard};
    use crate::clock::ManualClock;
    use crate::session::{MemoryBackend, SessionStore};

    struct Fixture {
        resolver: Arc<IdentityResolver>,
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let backend = Arc::new(MemoryBackend::new());
        let sessions = SessionStore::new(
            backend.clone(),
            clock.clone(),
            Duration::from_secs(100),
            Duration::from_secs(2),
        );
        let nonces = NonceIssuer::new(&[1u8; 32], Duration::from_secs(60), clock.clone()).unwrap();
        let resolver = IdentityResolver::new(sessions, nonces, ReplayGuard::new(10), "localhost", 50);
        Fixture {
            resolver: Arc::new(resolver),
            backend,
            clock,
        }
    }

    #[tokio::test]
    async fn sweep_step_reclaims_expired_state() {
        let fx = fixture();
        fx.resolver.sessions().create("user_1").await.unwrap();
        let now = fx.resolver.now();
        fx.resolver
            .replay_guard()
            .claim("nonce", now + TimeDelta::seconds(60), now);
        assert_eq!(fx.backend.len(), 1);

        fx.clock.advance(TimeDelta::seconds(120));
        ExpirySweeper::new(fx.resolver.clone(), Duration::from_secs(1))
            .sweep_step()
            .await;

        assert!(fx.resolver.replay_guard().is_empty());
        assert!(fx.backend.is_empty());
    }

    #[tokio::test]
    async fn sweep_step_keeps_live_state() {
        let fx = fixture();
        fx.resolver.sessions().create("user_1").await.unwrap();

        fx.clock.advance(TimeDelta::seconds(30));
        ExpirySweeper::new(fx.resolver.clone(), Duration::from_secs(1))
            .sweep_step()
            .await;

        assert_eq!(fx.backend.len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let fx = fixture();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            ExpirySweeper::new(fx.resolver, Duration::from_secs(3600)).run(shutdown.clone()),
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
