//! Error types for the eve-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Variants split into two groups: errors the caller can correct
//! (bad input, foreign bot, unknown user, wrong password) and errors that
//! are logged with detail here but must reach end users only as an opaque
//! internal failure. [`StoreError::public_message`] draws that line.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Message shown to end users for every non-correctable failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    // -- Connection ---------------------------------------------------------
    /// The database could not be opened, or the handle has been closed.
    #[error("database connection error: {0}")]
    Connection(String),

    /// `close` was called on a handle that is already closed.
    #[error("database connection already closed")]
    AlreadyClosed,

    // -- Caller-correctable -------------------------------------------------
    /// Malformed input (empty name, empty or over-long message, ...).
    #[error("invalid input: {0}")]
    Validation(String),

    /// The bot does not exist or belongs to another user.
    #[error("bot {bot_id} does not belong to user {user_id}")]
    Ownership { user_id: i64, bot_id: i64 },

    /// No user with the given name exists.
    #[error("user does not exist")]
    UserNotFound,

    /// The password does not match the stored hash.
    #[error("wrong password")]
    WrongPassword,

    // -- Internal -----------------------------------------------------------
    /// Password hashing failed.
    #[error("cannot hash password: {0}")]
    Hashing(String),

    /// SQLite operation failed (constraint violation, I/O, ...).
    #[error("sqlite error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),

    /// Catch-all for failures that fit no other variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the caller can fix this by changing its input.
    ///
    /// The web layer maps these to 4xx responses; everything else is a 5xx.
    pub fn is_caller_correctable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Ownership { .. } | Self::UserNotFound | Self::WrongPassword
        )
    }

    /// Text that is safe to show to an end user.
    ///
    /// Hash material, SQL errors and paths never appear here.
    pub fn public_message(&self) -> String {
        if self.is_caller_correctable() {
            self.to_string()
        } else {
            INTERNAL_ERROR_MESSAGE.to_string()
        }
    }

    /// Whether this wraps a SQLite constraint violation (unique, foreign key, check).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Persistence(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correctable_errors_keep_their_message() {
        let err = StoreError::Validation("message too long".into());
        assert!(err.is_caller_correctable());
        assert_eq!(err.public_message(), "invalid input: message too long");

        let err = StoreError::Ownership {
            user_id: 1,
            bot_id: 7,
        };
        assert!(err.is_caller_correctable());
        assert!(err.public_message().contains("bot 7"));
    }

    #[test]
    fn internal_errors_are_opaque() {
        let errors = [
            StoreError::Hashing("salt generation failed".into()),
            StoreError::Internal("malformed password hash for user 3".into()),
            StoreError::Connection("unable to open database file".into()),
            StoreError::Persistence(rusqlite::Error::QueryReturnedNoRows),
        ];
        for err in errors {
            assert!(!err.is_caller_correctable());
            assert_eq!(err.public_message(), INTERNAL_ERROR_MESSAGE);
        }
    }

    #[test]
    fn constraint_violation_detected() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: StoreError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_constraint_violation());
        assert!(!StoreError::UserNotFound.is_constraint_violation());
    }
}
