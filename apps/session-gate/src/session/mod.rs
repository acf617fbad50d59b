// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Store
//!
//! Server-held session records keyed by an opaque, unguessable session id.
//!
//! ## Layers
//!
//! - [`SessionBackend`]: synchronous storage trait. Every mutation is atomic
//!   per session id (write lock or a single redb write transaction).
//! - [`SessionStore`]: the async facade the rest of the service uses. It owns
//!   the clock and TTL, runs backend calls on the blocking pool and bounds
//!   them with a timeout.
//!
//! ## Expiry
//!
//! Expiry is lazy: a record whose `expires_at <= now` is reported as absent
//! by `lookup` and `rotate`. [`SessionStore::sweep_expired`] only reclaims
//! space; correctness never depends on it running.
//!
//! ## Cancellation
//!
//! Backend calls are spawned with `spawn_blocking`. Dropping the awaiting
//! future (client disconnect, timeout) detaches the task but never aborts
//! it, so a rotation either completes or never starts.

pub mod durable;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, TimeDelta, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

pub use durable::DurableBackend;
pub use memory::MemoryBackend;

/// Random bytes per session id (256 bits).
const SESSION_ID_BYTES: usize = 32;

/// Length of an encoded session id (base64url, no padding).
pub const SESSION_ID_LEN: usize = 43;

/// Server-side session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub subject_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotation_counter: u32,
}

impl SessionRecord {
    /// A record is live strictly before its expiry instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Build the record that replaces this one on rotation.
    ///
    /// `expires_at` of the successor is always strictly later than ours, even
    /// if the clock has stalled or gone backwards.
    pub fn successor(&self, session_id: String, now: DateTime<Utc>, ttl: TimeDelta) -> Self {
        let extended = add_saturating(now, ttl);
        let floor = add_saturating(self.expires_at, TimeDelta::seconds(1));
        Self {
            session_id,
            subject_id: self.subject_id.clone(),
            issued_at: now,
            expires_at: extended.max(floor),
            rotation_counter: self.rotation_counter.saturating_add(1),
        }
    }

    /// Short, non-secret prefix of the id for logs.
    pub fn id_hint(&self) -> &str {
        id_hint(&self.session_id)
    }
}

/// Session store failures.
///
/// Absence is never an error: lookups return `Ok(None)` for missing and
/// expired records alike. Every variant here means the store could not
/// answer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("session store {operation} timed out after {timeout:?}")]
    TimedOut {
        operation: &'static str,
        timeout: Duration,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Synchronous storage backend.
///
/// Implementations must make `create`, `rotate` and `revoke` atomic per
/// session id, and `lookup` must never observe a partially written record.
pub trait SessionBackend: Send + Sync + 'static {
    fn create(&self, record: SessionRecord) -> StoreResult<()>;

    /// Return the record if present and live at `now`.
    fn lookup(&self, session_id: &str, now: DateTime<Utc>) -> StoreResult<Option<SessionRecord>>;

    /// Atomically replace a live record with its successor under `new_id`.
    ///
    /// Returns `None` if the record is missing or expired. Once this returns
    /// `Some`, the old id no longer resolves.
    fn rotate(
        &self,
        session_id: &str,
        new_id: String,
        now: DateTime<Utc>,
        ttl: TimeDelta,
    ) -> StoreResult<Option<SessionRecord>>;

    /// Idempotent delete.
    fn revoke(&self, session_id: &str) -> StoreResult<()>;

    /// Delete every record expired at `now`, returning how many were removed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Async session store facade shared across requests.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            timeout,
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Start a new session for `subject_id`.
    pub async fn create(&self, subject_id: &str) -> StoreResult<SessionRecord> {
        let now = self.clock.now();
        let record = SessionRecord {
            session_id: generate_session_id()?,
            subject_id: subject_id.to_string(),
            issued_at: now,
            expires_at: add_saturating(now, self.ttl),
            rotation_counter: 0,
        };
        let stored = record.clone();
        self.run("create", move |backend| backend.create(stored))
            .await?;
        tracing::debug!(session = %record.id_hint(), subject = %record.subject_id, "Session created");
        Ok(record)
    }

    pub async fn lookup(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        let now = self.clock.now();
        let id = session_id.to_string();
        self.run("lookup", move |backend| backend.lookup(&id, now))
            .await
    }

    pub async fn rotate(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        let now = self.clock.now();
        let ttl = self.ttl;
        let id = session_id.to_string();
        let new_id = generate_session_id()?;
        self.run("rotate", move |backend| backend.rotate(&id, new_id, now, ttl))
            .await
    }

    pub async fn revoke(&self, session_id: &str) -> StoreResult<()> {
        let id = session_id.to_string();
        self.run("revoke", move |backend| backend.revoke(&id)).await
    }

    pub async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        self.run("sweep", move |backend| backend.sweep_expired(now))
            .await
    }

    /// Run a backend call on the blocking pool, bounded by the store timeout.
    async fn run<T, F>(&self, operation: &'static str, call: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SessionBackend) -> StoreResult<T> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let task = tokio::task::spawn_blocking(move || call(backend.as_ref()));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(StoreError::Unavailable(format!(
                "{operation} task failed: {join_error}"
            ))),
            Err(_) => Err(StoreError::TimedOut {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

fn add_saturating(instant: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    instant
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Generate a fresh session id: 32 bytes from the system CSPRNG, base64url.
pub fn generate_session_id() -> StoreResult<String> {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| StoreError::Unavailable("system randomness unavailable".to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Whether `value` has the shape of an id produced by [`generate_session_id`].
pub fn is_well_formed_session_id(value: &str) -> bool {
    value.len() == SESSION_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// First 8 characters of a session id, safe to log.
pub fn id_hint(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn store_with(
        backend: Arc<dyn SessionBackend>,
        ttl_secs: u64,
    ) -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = SessionStore::new(
            backend,
            clock.clone(),
            Duration::from_secs(ttl_secs),
            Duration::from_secs(2),
        );
        (store, clock)
    }

    #[test]
    fn generated_ids_are_well_formed_and_unique() {
        let a = generate_session_id().unwrap();
        let b = generate_session_id().unwrap();
        assert_eq!(a.len(), SESSION_ID_LEN);
        assert!(is_well_formed_session_id(&a));
        assert_ne!(a, b);
        assert_eq!(Base64UrlUnpadded::decode_vec(&a).unwrap().len(), 32);
    }

    #[test]
    fn malformed_ids_are_detected() {
        assert!(!is_well_formed_session_id(""));
        assert!(!is_well_formed_session_id("short"));
        assert!(!is_well_formed_session_id(&"a".repeat(44)));
        assert!(!is_well_formed_session_id(&format!("{}+", "a".repeat(42))));
    }

    #[test]
    fn successor_strictly_extends_expiry() {
        let record = SessionRecord {
            session_id: "old".to_string(),
            subject_id: "user_1".to_string(),
            issued_at: start(),
            expires_at: start() + TimeDelta::hours(2),
            rotation_counter: 3,
        };

        // Clock stalled: now + ttl would not pass the old expiry.
        let next = record.successor("new".to_string(), start(), TimeDelta::hours(1));
        assert!(next.expires_at > record.expires_at);
        assert_eq!(next.rotation_counter, 4);
        assert_eq!(next.subject_id, "user_1");
        assert_eq!(next.issued_at, start());

        let later = start() + TimeDelta::hours(3);
        let next = record.successor("new".to_string(), later, TimeDelta::hours(1));
        assert_eq!(next.expires_at, later + TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn record_is_valid_until_ttl_boundary() {
        let (store, clock) = store_with(Arc::new(MemoryBackend::new()), 100);
        let record = store.create("user_1").await.unwrap();
        assert_eq!(record.expires_at, start() + TimeDelta::seconds(100));
        assert_eq!(record.rotation_counter, 0);

        clock.set(start() + TimeDelta::milliseconds(99_999));
        assert!(store.lookup(&record.session_id).await.unwrap().is_some());

        clock.set(start() + TimeDelta::seconds(100));
        assert!(store.lookup(&record.session_id).await.unwrap().is_none());

        clock.set(start() + TimeDelta::seconds(500));
        assert!(store.lookup(&record.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotate_replaces_id_and_invalidates_old() {
        let (store, clock) = store_with(Arc::new(MemoryBackend::new()), 100);
        let record = store.create("user_1").await.unwrap();

        clock.advance(TimeDelta::seconds(60));
        let rotated = store.rotate(&record.session_id).await.unwrap().unwrap();

        assert_ne!(rotated.session_id, record.session_id);
        assert_eq!(rotated.subject_id, "user_1");
        assert_eq!(rotated.rotation_counter, 1);
        assert!(rotated.expires_at > record.expires_at);
        assert!(store.lookup(&record.session_id).await.unwrap().is_none());
        assert_eq!(
            store.lookup(&rotated.session_id).await.unwrap(),
            Some(rotated)
        );
    }

    #[tokio::test]
    async fn rotate_of_expired_session_is_absent() {
        let (store, clock) = store_with(Arc::new(MemoryBackend::new()), 10);
        let record = store.create("user_1").await.unwrap();

        clock.advance(TimeDelta::seconds(10));
        assert!(store.rotate(&record.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let (store, _clock) = store_with(Arc::new(MemoryBackend::new()), 100);
        let record = store.create("user_1").await.unwrap();

        store.revoke(&record.session_id).await.unwrap();
        store.revoke(&record.session_id).await.unwrap();
        store.revoke("never-existed").await.unwrap();
        assert!(store.lookup(&record.session_id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotations_leave_exactly_one_live_record() {
        let (store, clock) = store_with(Arc::new(MemoryBackend::new()), 100);
        let record = store.create("user_1").await.unwrap();
        clock.advance(TimeDelta::seconds(70));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let id = record.session_id.clone();
            handles.push(tokio::spawn(async move { store.rotate(&id).await }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            if let Some(next) = handle.await.unwrap().unwrap() {
                winners.push(next);
            }
        }

        assert_eq!(winners.len(), 1);
        assert!(store.lookup(&record.session_id).await.unwrap().is_none());
        assert!(store
            .lookup(&winners[0].session_id)
            .await
            .unwrap()
            .is_some());
    }

    struct StalledBackend;

    impl SessionBackend for StalledBackend {
        fn create(&self, _record: SessionRecord) -> StoreResult<()> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        }

        fn lookup(&self, _id: &str, _now: DateTime<Utc>) -> StoreResult<Option<SessionRecord>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(None)
        }

        fn rotate(
            &self,
            _id: &str,
            _new_id: String,
            _now: DateTime<Utc>,
            _ttl: TimeDelta,
        ) -> StoreResult<Option<SessionRecord>> {
            Ok(None)
        }

        fn revoke(&self, _id: &str) -> StoreResult<()> {
            Ok(())
        }

        fn sweep_expired(&self, _now: DateTime<Utc>) -> StoreResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn slow_backend_times_out_as_unavailable() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = SessionStore::new(
            Arc::new(StalledBackend),
            clock,
            Duration::from_secs(100),
            Duration::from_millis(20),
        );

        let err = store.lookup("anything").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::TimedOut {
                operation: "lookup",
                ..
            }
        ));

        let err = store.create("user_1").await.unwrap_err();
        assert!(matches!(err, StoreError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_records() {
        let (store, clock) = store_with(Arc::new(MemoryBackend::new()), 100);
        let old = store.create("user_1").await.unwrap();
        clock.advance(TimeDelta::seconds(60));
        let fresh = store.create("user_2").await.unwrap();

        clock.advance(TimeDelta::seconds(50));
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert!(store.lookup(&old.session_id).await.unwrap().is_none());
        assert!(store.lookup(&fresh.session_id).await.unwrap().is_some());
    }
}
