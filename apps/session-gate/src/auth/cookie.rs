// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The `auth_session` cookie.

use axum::http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::{DateTime, Utc};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "auth_session";

const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Cookie change the resolver wants applied to the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieDirective {
    /// Point the browser at a (new) session id.
    Set {
        session_id: String,
        expires_at: DateTime<Utc>,
    },
    /// Remove the cookie.
    Clear,
}

/// Attributes shared by every cookie this service writes.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl CookiePolicy {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    /// Render a `Set-Cookie` value for `directive`.
    pub fn render(&self, directive: &CookieDirective, now: DateTime<Utc>) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        match directive {
            CookieDirective::Set {
                session_id,
                expires_at,
            } => {
                let max_age = expires_at.signed_duration_since(now).num_seconds().max(0);
                format!(
                    "{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax{secure}; Max-Age={max_age}; Expires={}",
                    expires_at.format("%a, %d %b %Y %H:%M:%S GMT")
                )
            }
            CookieDirective::Clear => format!(
                "{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax{secure}; Max-Age=0; Expires={EPOCH_EXPIRES}"
            ),
        }
    }

    /// Append the directive to `headers` as a `Set-Cookie` header.
    ///
    /// Does nothing if a handler already wrote the session cookie.
    pub fn apply(&self, directive: &CookieDirective, now: DateTime<Utc>, headers: &mut HeaderMap) {
        if sets_session_cookie(headers) {
            return;
        }
        match HeaderValue::from_str(&self.render(directive, now)) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "Session cookie is not a valid header value"),
        }
    }
}

/// Read a cookie by name from every `Cookie` header on the request.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}

/// Whether the response already carries a `Set-Cookie` for the session cookie.
pub fn sets_session_cookie(headers: &HeaderMap) -> bool {
    let prefix = format!("{SESSION_COOKIE}=");
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&prefix))
}
