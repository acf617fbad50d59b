// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential extraction.
//!
//! Pulls whatever identity material a request carries out of its headers.
//! Nothing here verifies anything; malformed input is simply absent.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64ct::{Base64, Encoding};

use super::cookie::{read_cookie, SESSION_COOKIE};
use super::proof::WalletProof;
use crate::session::is_well_formed_session_id;

/// Standard-base64 Ed25519 public key.
pub const WALLET_PUBLIC_KEY_HEADER: &str = "x-wallet-public-key";
/// Standard-base64 UTF-8 sign-in message.
pub const WALLET_MESSAGE_HEADER: &str = "x-wallet-message";
/// Standard-base64 detached Ed25519 signature.
pub const WALLET_SIGNATURE_HEADER: &str = "x-wallet-signature";

/// Unverified identity material found on a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateCredentials {
    pub session_id: Option<String>,
    pub wallet_proof: Option<WalletProof>,
}

impl CandidateCredentials {
    /// Extract candidates from request headers.
    ///
    /// The session id comes from the `auth_session` cookie, falling back to
    /// `Authorization: Bearer <session id>` for clients without a cookie jar.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let session_id = read_cookie(headers, SESSION_COOKIE)
            .filter(|value| !value.is_empty())
            .or_else(|| bearer_token(headers))
            .filter(|value| is_well_formed_session_id(value))
            .map(str::to_string);

        Self {
            session_id,
            wallet_proof: wallet_proof(headers),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.wallet_proof.is_none()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn wallet_proof(headers: &HeaderMap) -> Option<WalletProof> {
    let public_key = header_str(headers, WALLET_PUBLIC_KEY_HEADER)?;
    let message = header_str(headers, WALLET_MESSAGE_HEADER)?;
    let signature = header_str(headers, WALLET_SIGNATURE_HEADER)?;

    let message = Base64::decode_vec(message.trim()).ok()?;
    let message = String::from_utf8(message).ok()?;
    WalletProof::from_encoded(public_key, &message, signature)
}
