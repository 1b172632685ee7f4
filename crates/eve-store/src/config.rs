//! Store configuration.
//!
//! Loaded from a TOML file (every field optional) and then overridden from
//! `EVE_*` environment variables.
//!
//! ```toml
//! database_path = "data/eve.db"
//! busy_timeout_ms = 5000
//!
//! [hashing]
//! iterations = 600000
//!
//! [session]
//! key_bytes = 32
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::db::DEFAULT_BUSY_TIMEOUT_MS;
use crate::error::{StoreError, StoreResult};

/// PBKDF2-HMAC-SHA256 with 600,000 iterations (OWASP 2023).
pub const DEFAULT_HASH_ITERATIONS: u32 = 600_000;

/// 256-bit session keys.
pub const DEFAULT_SESSION_KEY_BYTES: usize = 32;

/// Shortest session key accepted by [`StoreConfig::validate`].
pub const MIN_SESSION_KEY_BYTES: usize = 16;

/// Top-level configuration for opening a [`crate::Store`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite file location.
    pub database_path: PathBuf,
    /// How long a writer waits on a locked database.
    pub busy_timeout_ms: u32,
    pub hashing: HashingConfig,
    pub session: SessionConfig,
}

/// Password hashing cost.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashingConfig {
    /// PBKDF2 iteration count used for new hashes. Existing hashes keep
    /// the count they were created with.
    pub iterations: u32,
}

/// Session key generation.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Random bytes per generated key (before base64).
    pub key_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/eve.db"),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            hashing: HashingConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_HASH_ITERATIONS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_bytes: DEFAULT_SESSION_KEY_BYTES,
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        toml::from_str(content).map_err(|e| StoreError::Validation(format!("invalid config: {e}")))
    }

    /// Load the config file at `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Internal(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Apply `EVE_DATABASE_PATH`, `EVE_HASH_ITERATIONS` and
    /// `EVE_SESSION_KEY_BYTES` from the process environment.
    pub fn apply_env(self) -> StoreResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        if let Some(path) = lookup("EVE_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("EVE_HASH_ITERATIONS") {
            self.hashing.iterations = parse_env("EVE_HASH_ITERATIONS", &raw)?;
        }
        if let Some(raw) = lookup("EVE_SESSION_KEY_BYTES") {
            self.session.key_bytes = parse_env("EVE_SESSION_KEY_BYTES", &raw)?;
        }
        Ok(self)
    }

    /// Reject settings that would weaken credentials.
    pub fn validate(&self) -> StoreResult<()> {
        if self.hashing.iterations == 0 {
            return Err(StoreError::Validation(
                "hashing.iterations must be greater than zero".into(),
            ));
        }
        if self.session.key_bytes < MIN_SESSION_KEY_BYTES {
            return Err(StoreError::Validation(format!(
                "session.key_bytes must be at least {MIN_SESSION_KEY_BYTES}"
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> StoreResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| StoreError::Validation(format!("{key} is not a valid number: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = StoreConfig::from_toml_str("").unwrap();
        assert_eq!(config.database_path, PathBuf::from("data/eve.db"));
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert_eq!(config.hashing.iterations, DEFAULT_HASH_ITERATIONS);
        assert_eq!(config.session.key_bytes, DEFAULT_SESSION_KEY_BYTES);
        config.validate().unwrap();
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = StoreConfig::from_toml_str(
            r#"
            database_path = "/var/lib/eve/eve.db"

            [hashing]
            iterations = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/eve/eve.db"));
        assert_eq!(config.hashing.iterations, 1000);
        assert_eq!(config.session.key_bytes, DEFAULT_SESSION_KEY_BYTES);
    }

    #[test]
    fn unknown_field_rejected() {
        let err = StoreConfig::from_toml_str("databse_path = \"x\"").unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let config = StoreConfig::default()
            .apply_overrides(|key| match key {
                "EVE_DATABASE_PATH" => Some("/tmp/other.db".into()),
                "EVE_HASH_ITERATIONS" => Some(" 2000 ".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.hashing.iterations, 2000);
        assert_eq!(config.session.key_bytes, DEFAULT_SESSION_KEY_BYTES);
    }

    #[test]
    fn bad_env_value_rejected() {
        let err = StoreConfig::default()
            .apply_overrides(|key| (key == "EVE_SESSION_KEY_BYTES").then(|| "lots".to_string()))
            .unwrap_err();
        match err {
            StoreError::Validation(msg) => assert!(msg.contains("EVE_SESSION_KEY_BYTES")),
            other => panic!("expected Validation, got: {other}"),
        }
    }

    #[test]
    fn validate_rejects_weak_settings() {
        let mut config = StoreConfig::default();
        config.hashing.iterations = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.session.key_bytes = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::load(dir.path().join("eve.toml")).unwrap();
        assert_eq!(config.hashing.iterations, DEFAULT_HASH_ITERATIONS);
    }
}
