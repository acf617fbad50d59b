// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet Session Gate - Identity Resolution & Request Gating
//!
//! Resolves who is behind each request, from either a server-issued session
//! cookie or an Ed25519 wallet-signed sign-in message, and enforces route
//! policy before any handler runs.
//!
//! ## Modules
//!
//! - `api` - HTTP endpoints and router assembly (Axum)
//! - `auth` - Credential extraction, identity resolution, route gate
//! - `session` - Session store with memory and redb backends
//! - `maintenance` - Background expiry sweeper
//! - `audit` - Structured audit events

pub mod api;
pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod maintenance;
pub mod session;
pub mod state;
