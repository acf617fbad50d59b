// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup and then
//! passed explicitly to the components that need it.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory for the persistent session database | unset (in-memory sessions) |
//! | `APP_DOMAIN` | Domain that wallet sign-in messages must name | `localhost` |
//! | `SESSION_TTL_SECS` | Session lifetime | `86400` |
//! | `SESSION_REFRESH_PERCENT` | Share of the TTL after which a session is rotated | `50` |
//! | `NONCE_TTL_SECS` | Wallet proof acceptance window | `300` |
//! | `NONCE_CACHE_CAPACITY` | Max tracked used nonces | `100000` |
//! | `NONCE_SECRET` | Base64 HMAC key for nonce tokens (>= 32 bytes) | random per process |
//! | `STORE_TIMEOUT_MS` | Session store call timeout | `2000` |
//! | `SWEEP_INTERVAL_SECS` | Expired session / nonce sweep interval | `60` |
//! | `COOKIE_SECURE` | Emit the `Secure` cookie attribute | `true` |
//! | `LOGIN_PATH` | Redirect target for anonymous protected requests | `/login` |
//! | `HOME_PATH` | Redirect target for authenticated login requests | `/dashboard` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use base64ct::{Base64, Encoding};
use ring::rand::{SecureRandom, SystemRandom};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Directory holding `sessions.redb`. When unset, sessions live in memory
/// and are lost on restart.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const APP_DOMAIN_ENV: &str = "APP_DOMAIN";
pub const SESSION_TTL_ENV: &str = "SESSION_TTL_SECS";
pub const SESSION_REFRESH_PERCENT_ENV: &str = "SESSION_REFRESH_PERCENT";
pub const NONCE_TTL_ENV: &str = "NONCE_TTL_SECS";
pub const NONCE_CACHE_CAPACITY_ENV: &str = "NONCE_CACHE_CAPACITY";

/// Base64-encoded HMAC key used to authenticate nonce tokens.
///
/// Must be shared by every instance behind a load balancer; a per-process
/// random key only works for single-instance deployments.
pub const NONCE_SECRET_ENV: &str = "NONCE_SECRET";

pub const STORE_TIMEOUT_ENV: &str = "STORE_TIMEOUT_MS";
pub const SWEEP_INTERVAL_ENV: &str = "SWEEP_INTERVAL_SECS";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";
pub const LOGIN_PATH_ENV: &str = "LOGIN_PATH";
pub const HOME_PATH_ENV: &str = "HOME_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// File name of the session database inside `DATA_DIR`.
pub const SESSION_DB_FILE: &str = "sessions.redb";

const MIN_NONCE_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone)]
pub struct GateConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: Option<PathBuf>,
    pub app_domain: String,
    pub session_ttl: Duration,
    pub refresh_percent: u8,
    pub nonce_ttl: Duration,
    pub nonce_cache_capacity: usize,
    pub nonce_secret: Vec<u8>,
    /// True when `NONCE_SECRET` was not provided and a random key was drawn.
    pub nonce_secret_generated: bool,
    pub store_timeout: Duration,
    pub sweep_interval: Duration,
    pub cookie_secure: bool,
    pub login_path: String,
    pub home_path: String,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateConfig")
            .field("bind_addr", &self.bind_addr)
            .field("data_dir", &self.data_dir)
            .field("app_domain", &self.app_domain)
            .field("session_ttl", &self.session_ttl)
            .field("refresh_percent", &self.refresh_percent)
            .field("nonce_ttl", &self.nonce_ttl)
            .field("nonce_cache_capacity", &self.nonce_cache_capacity)
            .field("nonce_secret", &"[REDACTED]")
            .field("nonce_secret_generated", &self.nonce_secret_generated)
            .field("store_timeout", &self.store_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .field("cookie_secure", &self.cookie_secure)
            .field("login_path", &self.login_path)
            .field("home_path", &self.home_path)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

impl GateConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// `from_env` is this with `std::env::var`; tests pass a closure over a
    /// fixed map instead of mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or_default(&lookup, PORT_ENV, 8080)?;
        let bind_addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError(HOST_ENV.to_string(), e.to_string()))?;

        let data_dir = lookup(DATA_DIR_ENV)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        let app_domain = lookup(APP_DOMAIN_ENV).unwrap_or_else(|| "localhost".to_string());
        if app_domain.is_empty() || app_domain.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue(
                APP_DOMAIN_ENV.to_string(),
                "must be a non-empty domain without whitespace".to_string(),
            ));
        }

        let session_ttl_secs: u64 = parse_or_default(&lookup, SESSION_TTL_ENV, 86_400)?;
        if session_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                SESSION_TTL_ENV.to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let refresh_percent: u8 = parse_or_default(&lookup, SESSION_REFRESH_PERCENT_ENV, 50)?;
        if !(1..=99).contains(&refresh_percent) {
            return Err(ConfigError::InvalidValue(
                SESSION_REFRESH_PERCENT_ENV.to_string(),
                "must be between 1 and 99".to_string(),
            ));
        }

        let nonce_ttl_secs: u64 = parse_or_default(&lookup, NONCE_TTL_ENV, 300)?;
        if nonce_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                NONCE_TTL_ENV.to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let nonce_cache_capacity: usize =
            parse_or_default(&lookup, NONCE_CACHE_CAPACITY_ENV, 100_000)?;
        if nonce_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                NONCE_CACHE_CAPACITY_ENV.to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let (nonce_secret, nonce_secret_generated) = match lookup(NONCE_SECRET_ENV) {
            Some(encoded) => (decode_nonce_secret(&encoded)?, false),
            None => (random_secret()?, true),
        };

        let store_timeout_ms: u64 = parse_or_default(&lookup, STORE_TIMEOUT_ENV, 2_000)?;
        let sweep_interval_secs: u64 = parse_or_default(&lookup, SWEEP_INTERVAL_ENV, 60)?;
        let cookie_secure: bool = parse_or_default(&lookup, COOKIE_SECURE_ENV, true)?;

        let login_path = route_path(&lookup, LOGIN_PATH_ENV, "/login")?;
        let home_path = route_path(&lookup, HOME_PATH_ENV, "/dashboard")?;

        let log_format = match lookup(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    LOG_FORMAT_ENV.to_string(),
                    format!("expected 'json' or 'pretty', got '{other}'"),
                ))
            }
        };

        Ok(GateConfig {
            bind_addr,
            data_dir,
            app_domain,
            session_ttl: Duration::from_secs(session_ttl_secs),
            refresh_percent,
            nonce_ttl: Duration::from_secs(nonce_ttl_secs),
            nonce_cache_capacity,
            nonce_secret,
            nonce_secret_generated,
            store_timeout: Duration::from_millis(store_timeout_ms),
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(1)),
            cookie_secure,
            login_path,
            home_path,
            log_format,
        })
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{e}: {val}"))),
        None => Ok(default),
    }
}

fn route_path<F>(lookup: &F, key: &str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = lookup(key).unwrap_or_else(|| default.to_string());
    // Only same-site absolute paths, so redirects can never leave the origin.
    if !path.starts_with('/') || path.starts_with("//") {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be an absolute path starting with a single '/'".to_string(),
        ));
    }
    Ok(path)
}

fn decode_nonce_secret(encoded: &str) -> Result<Vec<u8>, ConfigError> {
    let secret = Base64::decode_vec(encoded.trim()).map_err(|e| {
        ConfigError::InvalidValue(NONCE_SECRET_ENV.to_string(), format!("invalid base64: {e}"))
    })?;
    if secret.len() < MIN_NONCE_SECRET_BYTES {
        return Err(ConfigError::InvalidValue(
            NONCE_SECRET_ENV.to_string(),
            format!(
                "expected at least {MIN_NONCE_SECRET_BYTES} bytes, got {}",
                secret.len()
            ),
        ));
    }
    Ok(secret)
}

fn random_secret() -> Result<Vec<u8>, ConfigError> {
    let mut secret = vec![0u8; MIN_NONCE_SECRET_BYTES];
    SystemRandom::new().fill(&mut secret).map_err(|_| {
        ConfigError::InvalidValue(
            NONCE_SECRET_ENV.to_string(),
            "system randomness unavailable".to_string(),
        )
    })?;
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<GateConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GateConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = load(&[]).unwrap();

        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert!(config.data_dir.is_none());
        assert_eq!(config.app_domain, "localhost");
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.refresh_percent, 50);
        assert_eq!(config.nonce_ttl, Duration::from_secs(300));
        assert_eq!(config.nonce_cache_capacity, 100_000);
        assert_eq!(config.nonce_secret.len(), 32);
        assert!(config.nonce_secret_generated);
        assert_eq!(config.store_timeout, Duration::from_millis(2_000));
        assert!(config.cookie_secure);
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.home_path, "/dashboard");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let secret = Base64::encode_string(&[7u8; 48]);
        let config = load(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("DATA_DIR", "/var/lib/gate"),
            ("APP_DOMAIN", "app.example.com"),
            ("SESSION_TTL_SECS", "3600"),
            ("SESSION_REFRESH_PERCENT", "75"),
            ("NONCE_SECRET", secret.as_str()),
            ("COOKIE_SECURE", "false"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/gate")));
        assert_eq!(config.app_domain, "app.example.com");
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.refresh_percent, 75);
        assert_eq!(config.nonce_secret, vec![7u8; 48]);
        assert!(!config.nonce_secret_generated);
        assert!(!config.cookie_secure);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_short_nonce_secret() {
        let short = Base64::encode_string(&[1u8; 16]);
        let result = load(&[("NONCE_SECRET", short.as_str())]);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue(ref key, _) if key == NONCE_SECRET_ENV
        ));
    }

    #[test]
    fn rejects_invalid_nonce_secret_base64() {
        let result = load(&[("NONCE_SECRET", "not base64!!")]);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue(ref key, _) if key == NONCE_SECRET_ENV
        ));
    }

    #[test]
    fn rejects_out_of_range_refresh_percent() {
        for value in ["0", "100"] {
            let result = load(&[("SESSION_REFRESH_PERCENT", value)]);
            assert!(matches!(
                result.unwrap_err(),
                ConfigError::InvalidValue(ref key, _) if key == SESSION_REFRESH_PERCENT_ENV
            ));
        }
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let result = load(&[("SESSION_TTL_SECS", "a day")]);
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_, _)));
    }

    #[test]
    fn rejects_redirect_paths_that_leave_the_origin() {
        for value in ["https://evil.example", "//evil.example", "login"] {
            let result = load(&[("LOGIN_PATH", value)]);
            assert!(matches!(
                result.unwrap_err(),
                ConfigError::InvalidValue(ref key, _) if key == LOGIN_PATH_ENV
            ));
        }
    }

    #[test]
    fn rejects_unknown_log_format() {
        let result = load(&[("LOG_FORMAT", "xml")]);
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_nonce_secret() {
        let config = load(&[]).unwrap();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
    }
}
