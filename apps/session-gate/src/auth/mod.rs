// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Identity resolution and request gating for the session gate.
//!
//! ## Auth Flow
//!
//! 1. The gate middleware extracts candidate credentials from the request:
//!    - `auth_session` cookie (or `Authorization: Bearer <session id>`)
//!    - wallet proof headers (`x-wallet-public-key`, `x-wallet-message`,
//!      `x-wallet-signature`)
//! 2. The identity resolver verifies them:
//!    - a live session wins and is rotated past the refresh point
//!    - otherwise a fresh, unreplayed, correctly signed wallet proof
//!      creates a new session
//! 3. The route policy decides allow / redirect / reject, and any cookie
//!    change is attached to the response.
//!
//! ## Security
//!
//! - Session ids carry 256 bits of entropy and are never logged in full
//! - Expired and unknown sessions are indistinguishable to callers
//! - Invalid and replayed wallet proofs are indistinguishable to callers
//! - A session store outage fails closed to anonymous on read paths

pub mod cookie;
pub mod credentials;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod principal;
pub mod proof;
pub mod replay;
pub mod resolver;
pub mod verify;

pub use cookie::{CookieDirective, CookiePolicy, SESSION_COOKIE};
pub use credentials::CandidateCredentials;
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use gate::{decide, gate_middleware, Decision, GatePolicy, PathClass};
pub use principal::{Principal, PrincipalKind};
pub use proof::{canonical_message, NonceIssuer, ProofRejection, SignInMessage, WalletProof};
pub use replay::ReplayGuard;
pub use resolver::{IdentityResolver, Resolution};
pub use verify::verify;
