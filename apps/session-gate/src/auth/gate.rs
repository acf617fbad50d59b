// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Route policy gate.
//!
//! Runs in front of every handler:
//!
//! 1. Classify the path. Static assets and the logout endpoints skip
//!    resolution entirely.
//! 2. Resolve the principal from the request's credentials.
//! 3. Decide allow / redirect / reject from the class and the principal.
//! 4. Attach the resolver's cookie directive to whatever response results.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/dashboard", get(dashboard))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), gate_middleware))
//!     .with_state(state);
//! ```

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use super::cookie::CookiePolicy;
use super::credentials::CandidateCredentials;
use super::error::AuthError;
use super::principal::Principal;
use crate::state::AppState;

const PROTECTED_PREFIXES: &[&str] = &["/dashboard", "/profile", "/wallet"];
const AUTH_PREFIXES: &[&str] = &["/login", "/register"];
const LOGOUT_PATHS: &[&str] = &["/logout", "/api/auth/logout"];
const IMAGE_EXTENSIONS: &[&str] = &["svg", "png", "jpg", "jpeg", "gif", "webp", "ico", "avif"];

/// Route class used by the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// Never resolved, always passed through.
    Excluded,
    Public,
    /// Login and registration pages.
    Auth,
    /// Pages that require a principal.
    Protected,
    /// JSON API; mutating calls require a principal.
    Api { mutating: bool },
}

impl PathClass {
    pub fn classify(method: &Method, path: &str) -> Self {
        if is_excluded(path) {
            return PathClass::Excluded;
        }
        if AUTH_PREFIXES.iter().any(|prefix| under(path, prefix)) {
            return PathClass::Auth;
        }
        if PROTECTED_PREFIXES.iter().any(|prefix| under(path, prefix)) {
            return PathClass::Protected;
        }
        if under(path, "/api") {
            let writes = matches!(
                *method,
                Method::POST | Method::PUT | Method::PATCH | Method::DELETE
            );
            return PathClass::Api {
                mutating: writes && !under(path, "/api/auth"),
            };
        }
        PathClass::Public
    }
}

/// `path` is `prefix` or lies below it, matching whole segments only.
fn under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn is_excluded(path: &str) -> bool {
    if path.starts_with("/_next/static/")
        || under(path, "/_next/image")
        || path == "/favicon.ico"
        || LOGOUT_PATHS.contains(&path)
    {
        return true;
    }

    let file = path.rsplit('/').next().unwrap_or_default();
    file.rsplit_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty()
            && IMAGE_EXTENSIONS
                .iter()
                .any(|image| ext.eq_ignore_ascii_case(image))
    })
}

/// Outcome of the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectToLogin,
    RedirectHome,
    Reject,
}

/// The decision table.
pub fn decide(class: PathClass, principal: &Principal) -> Decision {
    let anonymous = principal.is_anonymous();
    match class {
        PathClass::Excluded | PathClass::Public | PathClass::Api { mutating: false } => {
            Decision::Allow
        }
        PathClass::Protected if anonymous => Decision::RedirectToLogin,
        PathClass::Api { mutating: true } if anonymous => Decision::Reject,
        PathClass::Auth if !anonymous => Decision::RedirectHome,
        PathClass::Protected | PathClass::Api { mutating: true } | PathClass::Auth => {
            Decision::Allow
        }
    }
}

/// Redirect targets and cookie attributes for the gate.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    login_path: String,
    home_path: String,
    cookies: CookiePolicy,
}

impl GatePolicy {
    pub fn new(
        login_path: impl Into<String>,
        home_path: impl Into<String>,
        cookies: CookiePolicy,
    ) -> Self {
        Self {
            login_path: login_path.into(),
            home_path: home_path.into(),
            cookies,
        }
    }

    pub fn cookies(&self) -> &CookiePolicy {
        &self.cookies
    }

    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    /// `LOGIN_PATH?next=<original path and query>`.
    pub fn login_redirect(&self, original: &str) -> String {
        let next: String = url::form_urlencoded::byte_serialize(original.as_bytes()).collect();
        format!("{}?next={next}", self.login_path)
    }
}

/// Gate middleware. Use with `axum::middleware::from_fn_with_state`.
pub async fn gate_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let class = PathClass::classify(request.method(), request.uri().path());
    if class == PathClass::Excluded {
        return next.run(request).await;
    }

    let credentials = CandidateCredentials::from_headers(request.headers());
    let resolution = state.resolver.resolve(&credentials).await;
    let decision = decide(class, &resolution.principal);

    let mut response = match decision {
        Decision::Allow => {
            request.extensions_mut().insert(resolution.principal.clone());
            next.run(request).await
        }
        Decision::RedirectToLogin => {
            let original = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            tracing::debug!(path = %request.uri().path(), "Anonymous request to protected page");
            Redirect::temporary(&state.policy.login_redirect(original)).into_response()
        }
        Decision::RedirectHome => Redirect::temporary(state.policy.home_path()).into_response(),
        Decision::Reject => {
            tracing::debug!(path = %request.uri().path(), "Anonymous API mutation rejected");
            AuthError::Unauthenticated.into_response()
        }
    };

    if let Some(directive) = &resolution.cookie {
        state
            .policy
            .cookies()
            .apply(directive, state.resolver.now(), response.headers_mut());
    }
    response
}
