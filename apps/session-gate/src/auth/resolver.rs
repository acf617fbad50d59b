// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Resolution
//!
//! Turns the candidate credentials on a request into exactly one
//! [`Principal`], plus an optional cookie change for the response.
//!
//! ## Precedence
//!
//! 1. A live session wins. Past the refresh point it is rotated and the new
//!    id is returned as a `Set` directive.
//! 2. Otherwise a wallet proof is checked (domain, nonce authenticity and
//!    window, replay, signature) and on success a new session is created.
//! 3. Otherwise the request is anonymous. A cookie that named a missing or
//!    expired session is cleared; during a store outage it is left alone.
//!
//! Verification and lookup failures never escape [`IdentityResolver::resolve`].
//! Only [`IdentityResolver::login_with_wallet`] reports typed errors.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;

use super::cookie::CookieDirective;
use super::credentials::CandidateCredentials;
use super::error::AuthError;
use super::principal::{Principal, PrincipalKind};
use super::proof::{NonceIssuer, ProofRejection, SignInMessage, WalletProof};
use super::replay::{Claim, ReplayGuard};
use super::verify::verify;
use crate::audit::{AuditEvent, AuditEventType};
use crate::clock::Clock;
use crate::session::{id_hint, SessionRecord, SessionStore};

/// Outcome of resolving one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub principal: Principal,
    pub cookie: Option<CookieDirective>,
}

impl Resolution {
    fn anonymous(at: DateTime<Utc>, cookie: Option<CookieDirective>) -> Self {
        Self {
            principal: Principal::anonymous(at),
            cookie,
        }
    }
}

enum SessionOutcome {
    Resolved(Resolution),
    /// Missing or expired; the store does not tell them apart.
    Absent,
    Unavailable,
}

pub struct IdentityResolver {
    sessions: SessionStore,
    nonces: NonceIssuer,
    replay: ReplayGuard,
    app_domain: String,
    refresh_after: TimeDelta,
}

impl IdentityResolver {
    /// `refresh_percent` is the share of the session TTL after which a
    /// session is rotated on use.
    pub fn new(
        sessions: SessionStore,
        nonces: NonceIssuer,
        replay: ReplayGuard,
        app_domain: impl Into<String>,
        refresh_percent: u8,
    ) -> Self {
        let refresh_after = (sessions.ttl() / 100) * i32::from(refresh_percent.clamp(1, 99));
        Self {
            sessions,
            nonces,
            replay,
            app_domain: app_domain.into(),
            refresh_after,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn nonces(&self) -> &NonceIssuer {
        &self.nonces
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    pub fn app_domain(&self) -> &str {
        &self.app_domain
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.sessions.clock().now()
    }

    /// Resolve the principal for a request. Never fails.
    pub async fn resolve(&self, credentials: &CandidateCredentials) -> Resolution {
        let now = self.now();
        let mut dead_cookie = false;

        if let Some(session_id) = credentials.session_id.as_deref() {
            match self.resolve_session(session_id, now).await {
                SessionOutcome::Resolved(resolution) => return resolution,
                SessionOutcome::Absent => dead_cookie = true,
                SessionOutcome::Unavailable => {}
            }
        }

        if let Some(proof) = credentials.wallet_proof.as_ref() {
            // Errors are already logged and audited.
            if let Ok(resolution) = self.authenticate_wallet(proof, now).await {
                return resolution;
            }
        }

        Resolution::anonymous(now, dead_cookie.then_some(CookieDirective::Clear))
    }

    /// Explicit wallet sign-in. Unlike `resolve`, failures are reported.
    pub async fn login_with_wallet(&self, proof: &WalletProof) -> Result<Resolution, AuthError> {
        self.authenticate_wallet(proof, self.now()).await
    }

    /// Revoke the session (if any) and clear the cookie.
    ///
    /// Store failures are logged; the browser is told to drop the cookie
    /// regardless.
    pub async fn logout(&self, session_id: Option<&str>) -> CookieDirective {
        if let Some(session_id) = session_id {
            match self.sessions.revoke(session_id).await {
                Ok(()) => {
                    AuditEvent::new(AuditEventType::SessionRevoked, self.now())
                        .with_session(id_hint(session_id))
                        .emit();
                }
                Err(e) => {
                    tracing::warn!(session = %id_hint(session_id), error = %e, "Failed to revoke session on logout");
                    AuditEvent::new(AuditEventType::StoreUnavailable, self.now())
                        .with_session(id_hint(session_id))
                        .failed(e.to_string())
                        .emit();
                }
            }
        }
        CookieDirective::Clear
    }

    async fn resolve_session(&self, session_id: &str, now: DateTime<Utc>) -> SessionOutcome {
        let record = match self.sessions.lookup(session_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(session = %id_hint(session_id), "Session cookie names no live session");
                return SessionOutcome::Absent;
            }
            Err(e) => {
                tracing::warn!(session = %id_hint(session_id), error = %e, "Session lookup failed; treating as unauthenticated");
                AuditEvent::new(AuditEventType::StoreUnavailable, now)
                    .with_session(id_hint(session_id))
                    .failed(e.to_string())
                    .emit();
                return SessionOutcome::Unavailable;
            }
        };

        let Some(principal) =
            Principal::authenticated(PrincipalKind::Session, record.subject_id.clone(), now)
        else {
            tracing::error!(session = %record.id_hint(), "Session record has an empty subject");
            return SessionOutcome::Absent;
        };

        let cookie = if now.signed_duration_since(record.issued_at) >= self.refresh_after {
            self.refresh(&record).await
        } else {
            None
        };

        SessionOutcome::Resolved(Resolution { principal, cookie })
    }

    /// Rotate a session past its refresh point. A lost race or a store
    /// failure keeps the request authenticated without a new cookie.
    async fn refresh(&self, record: &SessionRecord) -> Option<CookieDirective> {
        match self.sessions.rotate(&record.session_id).await {
            Ok(Some(next)) => {
                tracing::debug!(
                    from = %record.id_hint(),
                    to = %next.id_hint(),
                    rotation = next.rotation_counter,
                    "Session rotated"
                );
                AuditEvent::new(AuditEventType::SessionRotated, next.issued_at)
                    .with_subject(&next.subject_id)
                    .with_session(next.id_hint())
                    .with_details(json!({ "rotation_counter": next.rotation_counter }))
                    .emit();
                Some(CookieDirective::Set {
                    session_id: next.session_id,
                    expires_at: next.expires_at,
                })
            }
            Ok(None) => {
                tracing::debug!(session = %record.id_hint(), "Session already rotated by a concurrent request");
                None
            }
            Err(e) => {
                tracing::warn!(session = %record.id_hint(), error = %e, "Session rotation failed");
                None
            }
        }
    }

    async fn authenticate_wallet(
        &self,
        proof: &WalletProof,
        now: DateTime<Utc>,
    ) -> Result<Resolution, AuthError> {
        let subject_id = proof.subject_id();

        let nonce = match self.check_proof(proof, now) {
            Ok(nonce) => nonce,
            Err(rejection) => {
                let event_type = if rejection.is_replay() {
                    AuditEventType::ProofReplayed
                } else {
                    AuditEventType::AuthFailure
                };
                tracing::info!(subject = %subject_id, reason = %rejection, "Wallet proof rejected");
                AuditEvent::new(event_type, now)
                    .with_subject(&subject_id)
                    .failed(rejection.to_string())
                    .emit();
                return Err(if rejection.is_replay() {
                    AuthError::ReplayedProof
                } else {
                    AuthError::InvalidCredential
                });
            }
        };

        let record = match self.sessions.create(&subject_id).await {
            Ok(record) => record,
            Err(e) => {
                // Nothing was granted, so the proof may be retried.
                self.replay.release(&nonce);
                tracing::warn!(subject = %subject_id, error = %e, "Could not create session for wallet");
                AuditEvent::new(AuditEventType::StoreUnavailable, now)
                    .with_subject(&subject_id)
                    .failed(e.to_string())
                    .emit();
                return Err(AuthError::StoreUnavailable);
            }
        };

        let principal = Principal::authenticated(PrincipalKind::Wallet, subject_id.clone(), now)
            .ok_or_else(|| AuthError::Internal("empty wallet subject".to_string()))?;

        tracing::info!(subject = %subject_id, session = %record.id_hint(), "Wallet authenticated");
        AuditEvent::new(AuditEventType::SessionCreated, record.issued_at)
            .with_subject(&subject_id)
            .with_session(record.id_hint())
            .emit();
        AuditEvent::new(AuditEventType::AuthSuccess, now)
            .with_subject(&subject_id)
            .with_session(record.id_hint())
            .with_details(json!({ "method": "wallet" }))
            .emit();

        Ok(Resolution {
            principal,
            cookie: Some(CookieDirective::Set {
                session_id: record.session_id,
                expires_at: record.expires_at,
            }),
        })
    }

    /// Every check short of creating the session. On success the nonce has
    /// been claimed and is returned.
    fn check_proof(
        &self,
        proof: &WalletProof,
        now: DateTime<Utc>,
    ) -> Result<String, ProofRejection> {
        let message = SignInMessage::parse(proof.message())?;
        if message.domain != self.app_domain {
            return Err(ProofRejection::DomainMismatch);
        }

        let nonce_expires_at = self.nonces.verify(&message.nonce, now)?;
        self.nonces.check_issued_at(message.issued_at, now)?;

        if self.replay.is_used(&message.nonce, now) {
            return Err(ProofRejection::Replayed);
        }

        if !verify(proof.message().as_bytes(), proof.signature(), proof.public_key()) {
            return Err(ProofRejection::BadSignature);
        }

        match self
            .replay
            .claim(&message.nonce, nonce_expires_at, now)
        {
            Claim::Accepted => Ok(message.nonce),
            Claim::Replayed => Err(ProofRejection::Replayed),
            Claim::Saturated => Err(ProofRejection::GuardSaturated),
        }
    }
}
