// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the principal attached by the gate.
//!
//! Use the `Auth` extractor in handlers to require a resolved principal:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(principal): Auth) -> impl IntoResponse {
//!     // principal.subject_id() is never empty here
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::{AuthError, Principal};

/// Extractor for a resolved (non-anonymous) principal.
///
/// Reads the principal the gate middleware stored in request extensions.
/// Rejects with `401` if the request is anonymous or the gate did not run.
pub struct Auth(pub Principal);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Principal>() {
            Some(principal) if !principal.is_anonymous() => Ok(Auth(principal.clone())),
            _ => Err(AuthError::Unauthenticated),
        }
    }
}

/// Optional authentication extractor.
///
/// Returns `None` for anonymous requests instead of rejecting.
pub struct OptionalAuth(pub Option<Principal>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(principal)) => Ok(OptionalAuth(Some(principal))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}
