// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::session::StoreError;

/// Authentication error type.
///
/// The resolver absorbs most of these into an anonymous principal. They
/// only reach a client from the gate (`Unauthenticated`), the `Auth`
/// extractor and the explicit wallet login endpoint.
#[derive(Debug)]
pub enum AuthError {
    /// Signature, nonce or message did not verify
    InvalidCredential,
    /// Nonce already consumed or past its window
    ReplayedProof,
    /// Session store timed out or failed; retryable
    StoreUnavailable,
    /// No principal where one is required
    Unauthenticated,
    /// Request body could not be decoded
    MalformedRequest(String),
    /// Internal error
    Internal(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    ///
    /// Invalid and replayed proofs share a code so callers cannot probe
    /// which nonces have been seen.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential | AuthError::ReplayedProof => "invalid_credential",
            AuthError::StoreUnavailable => "store_unavailable",
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::MalformedRequest(_) => "malformed_request",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredential
            | AuthError::ReplayedProof
            | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StoreUnavailable)
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidCredential | AuthError::ReplayedProof => {
                write!(f, "Invalid credentials")
            }
            AuthError::StoreUnavailable => {
                write!(f, "Session service temporarily unavailable, retry shortly")
            }
            AuthError::Unauthenticated => write!(f, "Authentication required"),
            AuthError::MalformedRequest(msg) => write!(f, "Malformed request: {msg}"),
            AuthError::Internal(_) => write!(f, "Internal authentication error"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<StoreError> for AuthError {
    fn from(_: StoreError) -> Self {
        AuthError::StoreUnavailable
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retryable = self.is_retryable();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        let mut response = (status, body).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
