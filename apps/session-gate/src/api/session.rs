// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints: explicit wallet sign-in, logout and "who am I".

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{
    Auth, AuthError, CandidateCredentials, CookieDirective, Principal, PrincipalKind, WalletProof,
};
use crate::state::AppState;

/// Signed sign-in message submitted by a wallet.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WalletLoginRequest {
    /// Ed25519 public key, standard base64 (32 bytes).
    pub public_key: String,
    /// The exact sign-in message that was signed, as plain text.
    pub message: String,
    /// Ed25519 signature over `message`, standard base64 (64 bytes).
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WalletLoginResponse {
    pub subject_id: String,
    pub kind: PrincipalKind,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Sign in with a wallet-signed message and receive a session cookie.
#[utoipa::path(
    post,
    path = "/api/auth/wallet",
    tag = "Session",
    request_body = WalletLoginRequest,
    responses(
        (status = 200, description = "Session created; cookie set", body = WalletLoginResponse),
        (status = 400, description = "Body or field encoding is invalid"),
        (status = 401, description = "Proof rejected"),
        (status = 503, description = "Session store unavailable, retry")
    )
)]
pub async fn wallet_login(
    State(state): State<AppState>,
    body: Result<Json<WalletLoginRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let Json(request) = body.map_err(|e| AuthError::MalformedRequest(e.body_text()))?;

    let proof = WalletProof::from_encoded(&request.public_key, &request.message, &request.signature)
        .ok_or_else(|| {
            AuthError::MalformedRequest("public_key and signature must be base64 Ed25519".into())
        })?;

    let resolution = state.resolver.login_with_wallet(&proof).await?;
    let (directive, expires_at) = match &resolution.cookie {
        Some(directive @ CookieDirective::Set { expires_at, .. }) => (directive, *expires_at),
        _ => {
            return Err(AuthError::Internal(
                "wallet login produced no session".to_string(),
            ))
        }
    };

    let body = WalletLoginResponse {
        subject_id: resolution.principal.subject_id().to_string(),
        kind: resolution.principal.kind(),
        expires_at,
    };
    let mut response = (StatusCode::OK, Json(body)).into_response();
    state
        .policy
        .cookies()
        .apply(directive, state.resolver.now(), response.headers_mut());
    Ok(response)
}

/// Revoke the current session, if any, and clear the cookie.
///
/// Succeeds without a session and during a store outage.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Session",
    responses(
        (status = 200, description = "Cookie cleared", body = LogoutResponse)
    )
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let credentials = CandidateCredentials::from_headers(&headers);
    let directive = state
        .resolver
        .logout(credentials.session_id.as_deref())
        .await;

    let mut response = Json(LogoutResponse { success: true }).into_response();
    state
        .policy
        .cookies()
        .apply(&directive, state.resolver.now(), response.headers_mut());
    response
}

/// The principal the gate resolved for this request.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "Session",
    responses(
        (status = 200, description = "Resolved principal", body = Principal),
        (status = 401, description = "Anonymous request")
    )
)]
pub async fn current_principal(Auth(principal): Auth) -> Json<Principal> {
    Json(principal)
}
