// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The resolved identity behind a request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How a principal was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// No verified credential.
    Anonymous,
    /// Resolved from a live server-side session.
    Session,
    /// Resolved from a fresh wallet signature on this request.
    Wallet,
}

/// Identity attached to a request by the gate.
///
/// `Anonymous` always has an empty `subject_id` and every other kind a
/// non-empty one. The fields are private so that holds for every value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    kind: PrincipalKind,
    /// User id or canonical wallet public key (empty when anonymous).
    #[schema(example = "3q2+7wAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")]
    subject_id: String,
    resolved_at: DateTime<Utc>,
}

impl Principal {
    pub fn anonymous(at: DateTime<Utc>) -> Self {
        Self {
            kind: PrincipalKind::Anonymous,
            subject_id: String::new(),
            resolved_at: at,
        }
    }

    /// Returns `None` for `Anonymous` or an empty subject.
    pub fn authenticated(
        kind: PrincipalKind,
        subject_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Option<Self> {
        let subject_id = subject_id.into();
        if kind == PrincipalKind::Anonymous || subject_id.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            subject_id,
            resolved_at: at,
        })
    }

    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == PrincipalKind::Anonymous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_has_empty_subject() {
        let p = Principal::anonymous(Utc::now());
        assert!(p.is_anonymous());
        assert_eq!(p.subject_id(), "");
    }

    #[test]
    fn authenticated_requires_subject_and_non_anonymous_kind() {
        let now = Utc::now();
        assert!(Principal::authenticated(PrincipalKind::Session, "", now).is_none());
        assert!(Principal::authenticated(PrincipalKind::Anonymous, "user_1", now).is_none());

        let p = Principal::authenticated(PrincipalKind::Wallet, "key", now).unwrap();
        assert!(!p.is_anonymous());
        assert_eq!(p.kind(), PrincipalKind::Wallet);
        assert_eq!(p.subject_id(), "key");
        assert_eq!(p.resolved_at(), now);
    }

    #[test]
    fn serializes_kind_in_snake_case() {
        let p = Principal::authenticated(PrincipalKind::Session, "user_1", Utc::now()).unwrap();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "session");
        assert_eq!(json["subject_id"], "user_1");
    }
}
