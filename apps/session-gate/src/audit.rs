// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Authentication outcomes, replay attempts and session lifecycle changes
//! are emitted as one JSON object per event on the `audit` tracing target,
//! so they can be routed to a separate sink with an `EnvFilter` directive
//! such as `audit=info`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tracing target for audit events.
pub const AUDIT_TARGET: &str = "audit";

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Authentication
    AuthSuccess,
    AuthFailure,
    ProofReplayed,

    // Session lifecycle
    SessionCreated,
    SessionRotated,
    SessionRevoked,

    // Infrastructure
    StoreUnavailable,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Subject involved (user id or wallet key), if known.
    pub subject_id: Option<String>,
    /// Non-secret prefix of the session id involved.
    pub session_hint: Option<String>,
    /// Additional details as JSON.
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType, at: DateTime<Utc>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: at,
            event_type,
            subject_id: None,
            session_hint: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_session(mut self, session_hint: impl Into<String>) -> Self {
        self.session_hint = Some(session_hint.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Write the event to the audit target.
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => {
                if self.success {
                    tracing::info!(target: AUDIT_TARGET, event = %json, "audit");
                } else {
                    tracing::warn!(target: AUDIT_TARGET, event = %json, "audit");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize audit event"),
        }
    }
}
