// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded used-nonce set for wallet proof replay protection.
//!
//! Entries are keyed by the nonce alone: a server-issued nonce is good for
//! exactly one sign-in, whichever key signs it. Each entry lives until the
//! nonce's acceptance window closes. Once a nonce is stale it is rejected by
//! the issuer anyway, so forgetting it afterwards is safe.
//!
//! The cache never evicts a live entry. When it is full and no entry has
//! expired, new claims are refused.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;

/// Result of trying to claim a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// First use; the nonce is now recorded.
    Accepted,
    /// Already used inside its window.
    Replayed,
    /// Cache is full of live entries.
    Saturated,
}

pub struct ReplayGuard {
    used: Mutex<LruCache<String, DateTime<Utc>>>,
}

impl ReplayGuard {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            used: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, DateTime<Utc>>> {
        // Entries are plain values; a panic elsewhere cannot leave one half written.
        self.used.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the nonce has already been claimed and is still inside its window.
    pub fn is_used(&self, nonce: &str, now: DateTime<Utc>) -> bool {
        self.lock()
            .peek(nonce)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Atomically record the nonce as used until `expires_at`.
    pub fn claim(&self, nonce: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Claim {
        let mut used = self.lock();

        if used.peek(nonce).is_some_and(|expiry| *expiry > now) {
            return Claim::Replayed;
        }

        if used.len() >= used.cap().get() && !used.contains(nonce) {
            prune_tail(&mut used, now);
            // Claim order is not expiry order: a live tail can hide expired
            // entries further in.
            if used.len() >= used.cap().get() {
                prune_expired(&mut used, now);
            }
            if used.len() >= used.cap().get() {
                tracing::warn!(capacity = used.cap().get(), "Replay guard full; refusing claim");
                return Claim::Saturated;
            }
        }

        used.put(nonce.to_string(), expires_at);
        Claim::Accepted
    }

    /// Forget a claim so the same proof can be retried.
    ///
    /// Only the caller that received `Claim::Accepted` may release it, and
    /// only when nothing was granted on the strength of that claim.
    pub fn release(&self, nonce: &str) {
        self.lock().pop(nonce);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        prune_expired(&mut self.lock(), now)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pop expired entries from the least recently used end until a live one is hit.
fn prune_tail(used: &mut LruCache<String, DateTime<Utc>>, now: DateTime<Utc>) {
    while let Some((_, expires_at)) = used.peek_lru() {
        if *expires_at > now {
            break;
        }
        used.pop_lru();
    }
}

fn prune_expired(used: &mut LruCache<String, DateTime<Utc>>, now: DateTime<Utc>) -> usize {
    let expired: Vec<String> = used
        .iter()
        .filter(|(_, expires_at)| **expires_at <= now)
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        used.pop(key);
    }
    expired.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn second_claim_of_same_nonce_is_replay() {
        let guard = ReplayGuard::new(10);
        let expires = now() + TimeDelta::seconds(300);

        assert!(!guard.is_used("n1", now()));
        assert_eq!(guard.claim("n1", expires, now()), Claim::Accepted);
        assert!(guard.is_used("n1", now()));
        assert_eq!(guard.claim("n1", expires, now()), Claim::Replayed);
        assert_eq!(guard.claim("n2", expires, now()), Claim::Accepted);
    }

    #[test]
    fn expired_entries_are_reclaimed_when_full() {
        let guard = ReplayGuard::new(2);
        let short = now() + TimeDelta::seconds(10);
        let long = now() + TimeDelta::seconds(300);

        assert_eq!(guard.claim("a", short, now()), Claim::Accepted);
        assert_eq!(guard.claim("b", long, now()), Claim::Accepted);

        let later = now() + TimeDelta::seconds(20);
        assert_eq!(guard.claim("c", long, later), Claim::Accepted);
        assert_eq!(guard.len(), 2);
        assert!(!guard.is_used("a", later));
        assert!(guard.is_used("b", later));
    }

    #[test]
    fn expired_entry_behind_live_tail_is_reclaimed_when_full() {
        let guard = ReplayGuard::new(2);

        // Claimed first but expires last, so it sits at the LRU tail.
        assert_eq!(
            guard.claim("late", now() + TimeDelta::seconds(300), now()),
            Claim::Accepted
        );
        assert_eq!(
            guard.claim("early", now() + TimeDelta::seconds(10), now()),
            Claim::Accepted
        );

        let later = now() + TimeDelta::seconds(20);
        assert_eq!(
            guard.claim("fresh", later + TimeDelta::seconds(300), later),
            Claim::Accepted
        );
        assert_eq!(guard.len(), 2);
        assert!(guard.is_used("late", later));
        assert!(guard.is_used("fresh", later));
        assert!(!guard.is_used("early", later));
    }

    #[test]
    fn full_of_live_entries_refuses_instead_of_evicting() {
        let guard = ReplayGuard::new(2);
        let expires = now() + TimeDelta::seconds(300);

        assert_eq!(guard.claim("a", expires, now()), Claim::Accepted);
        assert_eq!(guard.claim("b", expires, now()), Claim::Accepted);
        assert_eq!(guard.claim("c", expires, now()), Claim::Saturated);

        assert!(guard.is_used("a", now()));
        assert!(guard.is_used("b", now()));
        assert!(!guard.is_used("c", now()));
    }

    #[test]
    fn released_claim_can_be_made_again() {
        let guard = ReplayGuard::new(10);
        let expires = now() + TimeDelta::seconds(300);

        assert_eq!(guard.claim("n", expires, now()), Claim::Accepted);
        guard.release("n");
        assert!(!guard.is_used("n", now()));
        assert_eq!(guard.claim("n", expires, now()), Claim::Accepted);
    }

    #[test]
    fn prune_removes_only_expired() {
        let guard = ReplayGuard::new(10);
        guard.claim("a", now() + TimeDelta::seconds(5), now());
        guard.claim("b", now() + TimeDelta::seconds(50), now());

        assert_eq!(guard.prune(now() + TimeDelta::seconds(10)), 1);
        assert_eq!(guard.len(), 1);
        assert!(!guard.is_empty());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let guard = std::sync::Arc::new(ReplayGuard::new(100));
        let expires = now() + TimeDelta::seconds(300);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.claim("n", expires, now()))
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claim| *claim == Claim::Accepted)
            .count();
        assert_eq!(accepted, 1);
    }
}
