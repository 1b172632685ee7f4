//! Credential store.
//!
//! Creates user accounts and verifies passwords. Passwords are hashed with
//! PBKDF2-HMAC-SHA256 (ring) and stored as
//! `pbkdf2-sha256$<iterations>$base64(salt)$base64(hash)`, so the cost can
//! be raised later without invalidating existing accounts. The hash never
//! leaves this module.

use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::config::HashingConfig;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A user account as seen outside the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Row ID assigned by the store.
    pub id: i64,
    /// Unique login name.
    pub name: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  Password hashing
// ═══════════════════════════════════════════════════════════════════════

/// Longest password accepted for hashing.
pub const MAX_PASSWORD_BYTES: usize = 4096;

/// Salt length in bytes.
const SALT_LEN: usize = 32;

/// Derived key length in bytes.
const KEY_LEN: usize = 32;

/// Scheme tag at the front of every stored hash.
const SCHEME: &str = "pbkdf2-sha256";

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Hash a password into its storable form.
fn hash_password(password: &str, iterations: u32) -> StoreResult<String> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(StoreError::Hashing(format!(
            "password exceeds {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| StoreError::Hashing("iteration count must be non-zero".into()))?;

    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| StoreError::Hashing("failed to generate random salt".into()))?;

    let mut hash = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, iterations, &salt, password.as_bytes(), &mut hash);

    Ok(format!(
        "{SCHEME}${iterations}${}${}",
        BASE64.encode(salt),
        BASE64.encode(hash)
    ))
}

/// Verify a password against a stored hash.
///
/// `ring::pbkdf2::verify` compares in constant time. A stored value that
/// does not parse is an [`StoreError::Internal`], not a mismatch.
fn verify_password(password: &str, stored: &str) -> StoreResult<bool> {
    let malformed = |what: &str| StoreError::Internal(format!("malformed password hash: {what}"));

    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(malformed("wrong number of fields"));
    };
    if scheme != SCHEME {
        return Err(malformed("unknown scheme"));
    }

    let iterations = iterations
        .parse::<u32>()
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| malformed("bad iteration count"))?;
    let salt = BASE64.decode(salt).map_err(|_| malformed("bad salt encoding"))?;
    let expected = BASE64.decode(hash).map_err(|_| malformed("bad hash encoding"))?;

    Ok(pbkdf2::verify(PBKDF2_ALG, iterations, &salt, password.as_bytes(), &expected).is_ok())
}

// ═══════════════════════════════════════════════════════════════════════
//  UserStore
// ═══════════════════════════════════════════════════════════════════════

/// Account creation and password checks.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
    hashing: HashingConfig,
}

impl UserStore {
    /// Create a user store backed by `db` with the default hashing cost.
    pub fn new(db: Database) -> Self {
        Self::with_hashing(db, HashingConfig::default())
    }

    /// Create a user store with an explicit hashing cost.
    pub fn with_hashing(db: Database, hashing: HashingConfig) -> Self {
        Self { db, hashing }
    }

    /// Create a new user account.
    ///
    /// A taken name fails with [`StoreError::Persistence`] wrapping the
    /// unique constraint violation.
    #[instrument(skip(self, password))]
    pub async fn create(&self, name: &str, password: &str) -> StoreResult<User> {
        if name.is_empty() {
            return Err(StoreError::Validation("user name must not be empty".into()));
        }

        // Hashing is deliberately slow; keep it off the runtime and off the DB lock.
        let password = password.to_string();
        let iterations = self.hashing.iterations;
        let password_hash =
            tokio::task::spawn_blocking(move || hash_password(&password, iterations))
                .await?
                .inspect_err(|e| error!(%e, "password hashing failed"))?;

        let name = name.to_string();
        let now = Utc::now().timestamp();
        let user = self
            .db
            .execute(move |conn| {
                let inserted = conn.execute(
                    "INSERT INTO users (name, password_hash, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![name, password_hash, now],
                );
                match inserted {
                    Ok(_) => Ok(User {
                        id: conn.last_insert_rowid(),
                        name,
                    }),
                    Err(e) => {
                        let err = StoreError::from(e);
                        if err.is_constraint_violation() {
                            warn!(name = %name, "user name already taken");
                        } else {
                            error!(%err, "cannot insert user");
                        }
                        Err(err)
                    }
                }
            })
            .await?;

        debug!(user_id = user.id, name = %user.name, "user created");
        Ok(user)
    }

    /// Check a name/password pair.
    ///
    /// Returns the user's ID and name on success. Fails with
    /// [`StoreError::UserNotFound`] for an unknown name,
    /// [`StoreError::WrongPassword`] on mismatch and
    /// [`StoreError::Internal`] for any other store or hash failure.
    #[instrument(skip(self, password))]
    pub async fn check_credentials(&self, name: &str, password: &str) -> StoreResult<User> {
        let lookup_name = name.to_string();
        let row = self
            .db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, name, password_hash FROM users WHERE name = ?1",
                    rusqlite::params![lookup_name],
                    |row| {
                        Ok(AuthRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            password_hash: row.get(2)?,
                        })
                    },
                );
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(internal_on_persistence)?;

        let Some(row) = row else {
            debug!(name = %name, "login for unknown user");
            return Err(StoreError::UserNotFound);
        };

        let password = password.to_string();
        let AuthRow {
            id,
            name,
            password_hash,
        } = row;
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
            .await
            .map_err(|e| StoreError::Internal(format!("password check task failed: {e}")))?
            .inspect_err(|e| error!(user_id = id, %e, "cannot verify stored password hash"))?;

        if !valid {
            warn!(user_id = id, "wrong password");
            return Err(StoreError::WrongPassword);
        }

        debug!(user_id = id, "credentials accepted");
        Ok(User { id, name })
    }

    /// Fetch a single user by ID, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> StoreResult<Option<User>> {
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, name FROM users WHERE id = ?1",
                    rusqlite::params![id],
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
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }
}

/// Collapse raw SQLite failures into an opaque internal error, logging the detail.
fn internal_on_persistence(err: StoreError) -> StoreError {
    match err {
        StoreError::Persistence(e) => {
            error!(error = %e, "credential lookup failed");
            StoreError::Internal("credential lookup failed".into())
        }
        other => other,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

/// Raw row data for authentication (includes password_hash).
struct AuthRow {
    id: i64,
    name: String,
    password_hash: String,
}

// ── tests ────────────────────────────────────────────────────────────
