//! Session keys.
//!
//! A session key is an opaque bearer token stored on the user row. Each
//! user holds at most one key; a unique index keeps two users from ever
//! sharing one. Keys issued here are 256-bit random values from
//! `ring::rand::SystemRandom`, URL-safe base64 without padding.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, error, instrument, warn};

use crate::config::SessionConfig;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::user_store::User;

/// Generate a random session key from `len` bytes of OS entropy.
pub fn generate_session_key(len: usize) -> StoreResult<String> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| StoreError::Internal("failed to generate session key".into()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Issue, look up and revoke session keys.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    config: SessionConfig,
}

impl SessionStore {
    /// Create a session store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self::with_config(db, SessionConfig::default())
    }

    /// Create a session store whose issued keys follow `config`.
    pub fn with_config(db: Database, config: SessionConfig) -> Self {
        Self { db, config }
    }

    /// Overwrite the session key of exactly one user.
    ///
    /// Zero rows updated means the user does not exist
    /// ([`StoreError::UserNotFound`]). More than one is an integrity bug and
    /// is surfaced as [`StoreError::Internal`]. A key held by another user
    /// fails on the unique index with [`StoreError::Persistence`].
    #[instrument(skip(self, key))]
    pub async fn store_session_key(&self, user_id: i64, key: &str) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::Validation("session key must not be empty".into()));
        }

        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let updated = conn
                    .execute(
                        "UPDATE users SET session_key = ?1 WHERE id = ?2",
                        rusqlite::params![key, user_id],
                    )
                    .map_err(StoreError::from)
                    .inspect_err(|e| error!(user_id, error = %e, "cannot update session key"))?;
                match updated {
                    1 => Ok(()),
                    0 => {
                        warn!(user_id, "session key not stored: no such user");
                        Err(StoreError::UserNotFound)
                    }
                    n => {
                        error!(user_id, rows = n, "session key update touched several users");
                        Err(StoreError::Internal(format!(
                            "session key update affected {n} rows"
                        )))
                    }
                }
            })
            .await?;

        debug!(user_id, "session key stored");
        Ok(())
    }

    /// Generate a fresh key for `user_id`, store it and return it.
    #[instrument(skip(self))]
    pub async fn issue(&self, user_id: i64) -> StoreResult<String> {
        let key = generate_session_key(self.config.key_bytes)?;
        self.store_session_key(user_id, &key).await?;
        Ok(key)
    }

    /// Find the user owning `key`.
    ///
    /// An unknown key is `Ok(None)`; only genuine store failures are errors.
    #[instrument(skip(self, key))]
    pub async fn get_user_for_session(&self, key: &str) -> StoreResult<Option<User>> {
        if key.is_empty() {
            return Ok(None);
        }

        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, name FROM users WHERE session_key = ?1",
                    rusqlite::params![key],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    },
                );
                match result {
                    Ok(user) => Ok(Some(user)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => {
                        error!(error = %e, "cannot get user for session");
                        Err(e.into())
                    }
                }
            })
            .await
    }

    /// Clear the user's session key. Returns `false` if none was set.
    #[instrument(skip(self))]
    pub async fn revoke(&self, user_id: i64) -> StoreResult<bool> {
        self.db
            .execute(move |conn| {
                let cleared = conn.execute(
                    "UPDATE users SET session_key = NULL WHERE id = ?1 AND session_key IS NOT NULL",
                    rusqlite::params![user_id],
                )?;
                Ok(cleared > 0)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
