// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ed25519 detached-signature verification.

use ring::signature::{UnparsedPublicKey, ED25519};

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Check `signature` over `message` against `public_key`.
///
/// Pure and total: wrong-length keys or signatures, invalid curve points and
/// bad signatures all return `false`.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    if public_key.len() != PUBLIC_KEY_LEN || signature.len() != SIGNATURE_LEN {
        return false;
    }
    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(message, signature)
        .is_ok()
}
