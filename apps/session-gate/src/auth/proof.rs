// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Proof Protocol
//!
//! A wallet proves control of an Ed25519 key by signing a short, fixed-shape
//! message that embeds a server-issued nonce:
//!
//! ```text
//! <domain> wants you to sign in with your wallet.
//! Nonce: <nonce token>
//! Issued At: <RFC 3339 UTC timestamp>
//! ```
//!
//! ## Nonce Tokens
//!
//! Nonces are stateless. A token is base64url (unpadded) of
//! `16 random bytes || issued_at (u64 BE unix secs) || HMAC-SHA256[..16]`,
//! where the MAC covers the first 24 bytes. Any instance holding the same
//! `NONCE_SECRET` can check that a nonce was issued by the service and when.
//! Single use is enforced separately by the replay guard.

use std::sync::Arc;

use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

use super::verify::{PUBLIC_KEY_LEN, SIGNATURE_LEN};
use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

const NONCE_RANDOM_LEN: usize = 16;
const NONCE_PAYLOAD_LEN: usize = NONCE_RANDOM_LEN + 8;
const NONCE_TAG_LEN: usize = 16;
const NONCE_TOKEN_LEN: usize = NONCE_PAYLOAD_LEN + NONCE_TAG_LEN;

/// How far in the future a timestamp may be before it is rejected.
pub const MAX_FUTURE_SKEW_SECS: i64 = 60;

const STATEMENT_SUFFIX: &str = " wants you to sign in with your wallet.";
const NONCE_PREFIX: &str = "Nonce: ";
const ISSUED_AT_PREFIX: &str = "Issued At: ";

/// Why a wallet proof was refused.
///
/// Callers only ever see "invalid credentials"; the variant is for logs and
/// the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProofRejection {
    #[error("sign-in message is malformed")]
    MalformedMessage,

    #[error("sign-in message names a different domain")]
    DomainMismatch,

    #[error("nonce was not issued by this service")]
    ForgedNonce,

    #[error("nonce is outside the acceptance window")]
    StaleNonce,

    #[error("issued-at timestamp is outside the acceptance window")]
    ClockSkew,

    #[error("signature does not verify")]
    BadSignature,

    #[error("nonce already used by this key")]
    Replayed,

    #[error("replay guard is full")]
    GuardSaturated,
}

impl ProofRejection {
    /// Rejections caused by reuse or expiry of an otherwise genuine nonce.
    pub fn is_replay(&self) -> bool {
        matches!(self, ProofRejection::StaleNonce | ProofRejection::Replayed)
    }
}

/// A self-asserted wallet proof, decoded but not yet verified.
#[derive(Clone, PartialEq, Eq)]
pub struct WalletProof {
    public_key: [u8; PUBLIC_KEY_LEN],
    message: String,
    signature: [u8; SIGNATURE_LEN],
}

impl std::fmt::Debug for WalletProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletProof")
            .field("subject_id", &self.subject_id())
            .field("message_len", &self.message.len())
            .finish_non_exhaustive()
    }
}

impl WalletProof {
    /// Build a proof from raw parts. Returns `None` on wrong key or
    /// signature length.
    pub fn from_parts(public_key: &[u8], message: String, signature: &[u8]) -> Option<Self> {
        Some(Self {
            public_key: public_key.try_into().ok()?,
            message,
            signature: signature.try_into().ok()?,
        })
    }

    /// Build a proof from a standard-base64 key and signature and a plain
    /// UTF-8 message.
    pub fn from_encoded(public_key: &str, message: &str, signature: &str) -> Option<Self> {
        let public_key = Base64::decode_vec(public_key.trim()).ok()?;
        let signature = Base64::decode_vec(signature.trim()).ok()?;
        Self::from_parts(&public_key, message.to_string(), &signature)
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Canonical subject id for the wallet: standard base64 of the key.
    pub fn subject_id(&self) -> String {
        Base64::encode_string(&self.public_key)
    }
}

/// Parsed sign-in message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInMessage {
    pub domain: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

impl SignInMessage {
    /// Parse a message in canonical form.
    ///
    /// The parse is strict: exactly three `\n`-separated lines and no
    /// trailing newline, so one signature can only ever mean one message.
    pub fn parse(message: &str) -> Result<Self, ProofRejection> {
        let mut lines = message.split('\n');
        let (Some(statement), Some(nonce_line), Some(issued_line), None) =
            (lines.next(), lines.next(), lines.next(), lines.next())
        else {
            return Err(ProofRejection::MalformedMessage);
        };

        let domain = statement
            .strip_suffix(STATEMENT_SUFFIX)
            .filter(|domain| !domain.is_empty() && !domain.contains(char::is_whitespace))
            .ok_or(ProofRejection::MalformedMessage)?;
        let nonce = nonce_line
            .strip_prefix(NONCE_PREFIX)
            .filter(|nonce| !nonce.is_empty())
            .ok_or(ProofRejection::MalformedMessage)?;
        let issued_at = issued_line
            .strip_prefix(ISSUED_AT_PREFIX)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .ok_or(ProofRejection::MalformedMessage)?;

        Ok(Self {
            domain: domain.to_string(),
            nonce: nonce.to_string(),
            issued_at,
        })
    }
}

/// Render the message a wallet must sign.
pub fn canonical_message(domain: &str, nonce: &str, issued_at: DateTime<Utc>) -> String {
    format!(
        "{domain}{STATEMENT_SUFFIX}\n{NONCE_PREFIX}{nonce}\n{ISSUED_AT_PREFIX}{}",
        issued_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Issues and checks HMAC-authenticated nonce tokens.
pub struct NonceIssuer {
    mac: HmacSha256,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
}

impl NonceIssuer {
    pub fn new(
        secret: &[u8],
        ttl: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock,
            rng: SystemRandom::new(),
        })
    }

    /// Acceptance window of a nonce.
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Issue a fresh nonce stamped with the current time.
    ///
    /// Returns `None` only if the system randomness source fails.
    pub fn issue(&self) -> Option<String> {
        let mut token = [0u8; NONCE_TOKEN_LEN];
        self.rng.fill(&mut token[..NONCE_RANDOM_LEN]).ok()?;

        let issued = u64::try_from(self.clock.now().timestamp()).unwrap_or(0);
        token[NONCE_RANDOM_LEN..NONCE_PAYLOAD_LEN].copy_from_slice(&issued.to_be_bytes());

        let mut mac = self.mac.clone();
        mac.update(&token[..NONCE_PAYLOAD_LEN]);
        let tag = mac.finalize().into_bytes();
        token[NONCE_PAYLOAD_LEN..].copy_from_slice(&tag[..NONCE_TAG_LEN]);

        Some(Base64UrlUnpadded::encode_string(&token))
    }

    /// Check that `nonce` was issued here and is still inside its window.
    ///
    /// Returns the instant the nonce stops being acceptable.
    pub fn verify(&self, nonce: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ProofRejection> {
        let token = Base64UrlUnpadded::decode_vec(nonce).map_err(|_| ProofRejection::ForgedNonce)?;
        if token.len() != NONCE_TOKEN_LEN {
            return Err(ProofRejection::ForgedNonce);
        }

        let mut mac = self.mac.clone();
        mac.update(&token[..NONCE_PAYLOAD_LEN]);
        mac.verify_truncated_left(&token[NONCE_PAYLOAD_LEN..])
            .map_err(|_| ProofRejection::ForgedNonce)?;

        let mut secs = [0u8; 8];
        secs.copy_from_slice(&token[NONCE_RANDOM_LEN..NONCE_PAYLOAD_LEN]);
        let issued = i64::try_from(u64::from_be_bytes(secs))
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or(ProofRejection::ForgedNonce)?;

        if issued > now + TimeDelta::seconds(MAX_FUTURE_SKEW_SECS) {
            return Err(ProofRejection::ClockSkew);
        }
        let expires_at = issued
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if expires_at <= now {
            return Err(ProofRejection::StaleNonce);
        }
        Ok(expires_at)
    }

    /// Check the message's own `Issued At` against the acceptance window.
    pub fn check_issued_at(
        &self,
        issued_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ProofRejection> {
        if issued_at > now + TimeDelta::seconds(MAX_FUTURE_SKEW_SECS) {
            return Err(ProofRejection::ClockSkew);
        }
        if now.signed_duration_since(issued_at) >= self.ttl {
            return Err(ProofRejection::StaleNonce);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn issuer(secret: &[u8]) -> (NonceIssuer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let issuer = NonceIssuer::new(secret, Duration::from_secs(300), clock.clone()).unwrap();
        (issuer, clock)
    }

    #[test]
    fn canonical_message_parses_back() {
        let text = canonical_message("app.example.com", "abc123", start());
        assert_eq!(
            text,
            "app.example.com wants you to sign in with your wallet.\n\
             Nonce: abc123\n\
             Issued At: 2023-11-14T22:13:20Z"
        );

        let parsed = SignInMessage::parse(&text).unwrap();
        assert_eq!(parsed.domain, "app.example.com");
        assert_eq!(parsed.nonce, "abc123");
        assert_eq!(parsed.issued_at, start());
    }

    #[test]
    fn parse_rejects_non_canonical_shapes() {
        let good = canonical_message("localhost", "n", start());
        for bad in [
            String::new(),
            format!("{good}\n"),
            good.replace("wants you to sign in", "would like you to sign in"),
            good.replace("Nonce: n", "Nonce: "),
            good.replace("Issued At: ", "Issued: "),
            good.replace("2023-11-14T22:13:20Z", "yesterday"),
            format!("extra\n{good}"),
        ] {
            assert_eq!(
                SignInMessage::parse(&bad),
                Err(ProofRejection::MalformedMessage),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn issued_nonce_verifies_until_window_closes() {
        let (issuer, clock) = issuer(&[9u8; 32]);
        let nonce = issuer.issue().unwrap();
        assert_eq!(nonce.len(), 54);

        let expires_at = issuer.verify(&nonce, clock.now()).unwrap();
        assert_eq!(expires_at, start() + TimeDelta::seconds(300));

        clock.advance(TimeDelta::seconds(299));
        assert!(issuer.verify(&nonce, clock.now()).is_ok());

        clock.advance(TimeDelta::seconds(1));
        assert_eq!(
            issuer.verify(&nonce, clock.now()),
            Err(ProofRejection::StaleNonce)
        );
    }

    #[test]
    fn nonce_from_another_secret_is_forged() {
        let (ours, clock) = issuer(&[1u8; 32]);
        let (theirs, _) = issuer(&[2u8; 32]);
        let nonce = theirs.issue().unwrap();
        assert_eq!(
            ours.verify(&nonce, clock.now()),
            Err(ProofRejection::ForgedNonce)
        );
    }

    #[test]
    fn tampered_or_garbage_nonce_is_forged() {
        let (issuer, clock) = issuer(&[1u8; 32]);
        let nonce = issuer.issue().unwrap();

        let mut bytes = Base64UrlUnpadded::decode_vec(&nonce).unwrap();
        // Push the issue time back without re-signing.
        bytes[NONCE_PAYLOAD_LEN - 1] ^= 0x01;
        let tampered = Base64UrlUnpadded::encode_string(&bytes);

        for bad in [tampered.as_str(), "", "not-a-nonce", "abc123"] {
            assert_eq!(
                issuer.verify(bad, clock.now()),
                Err(ProofRejection::ForgedNonce)
            );
        }
    }

    #[test]
    fn issued_at_window_is_enforced() {
        let (issuer, clock) = issuer(&[1u8; 32]);
        let now = clock.now();

        assert!(issuer.check_issued_at(now, now).is_ok());
        assert!(issuer
            .check_issued_at(now + TimeDelta::seconds(60), now)
            .is_ok());
        assert_eq!(
            issuer.check_issued_at(now + TimeDelta::seconds(61), now),
            Err(ProofRejection::ClockSkew)
        );
        assert_eq!(
            issuer.check_issued_at(now - TimeDelta::seconds(300), now),
            Err(ProofRejection::StaleNonce)
        );
    }

    #[test]
    fn proof_decoding_checks_lengths() {
        let key = Base64::encode_string(&[3u8; 32]);
        let sig = Base64::encode_string(&[4u8; 64]);

        let proof = WalletProof::from_encoded(&key, "msg", &sig).unwrap();
        assert_eq!(proof.subject_id(), key);
        assert_eq!(proof.message(), "msg");

        assert!(WalletProof::from_encoded(&Base64::encode_string(&[3u8; 31]), "m", &sig).is_none());
        assert!(WalletProof::from_encoded(&key, "m", &Base64::encode_string(&[4u8; 63])).is_none());
        assert!(WalletProof::from_encoded("%%%", "m", &sig).is_none());
    }

    #[test]
    fn replay_classification() {
        assert!(ProofRejection::Replayed.is_replay());
        assert!(ProofRejection::StaleNonce.is_replay());
        assert!(!ProofRejection::BadSignature.is_replay());
        assert!(!ProofRejection::ForgedNonce.is_replay());
    }
}
