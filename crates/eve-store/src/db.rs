//! SQLite connection manager.
//!
//! The [`Database`] struct wraps a single `rusqlite::Connection` behind an
//! `Arc<Mutex<Option<_>>>` and exposes async methods that use
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.
//!
//! Clones share one connection slot. After [`Database::close`] the slot is
//! empty and every operation on any clone fails with
//! [`StoreError::Connection`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Default time a writer waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;

type Slot = Arc<Mutex<Option<Connection>>>;

/// Thread-safe handle to a SQLite database.
///
/// All read/write operations go through [`Database::execute`] or
/// [`Database::execute_mut`], which dispatch onto the blocking thread pool.
#[derive(Clone)]
pub struct Database {
    conn: Slot,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Database {
    /// Open (or create) a database at `path` and apply pragmas.
    ///
    /// This call blocks briefly (file I/O), so call it during startup before
    /// entering the main async loop, or wrap it in `spawn_blocking` yourself.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Like [`Database::open`] with an explicit busy timeout.
    pub fn open_with_busy_timeout(path: impl AsRef<Path>, busy_timeout_ms: u32) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path).map_err(|e| {
            StoreError::Connection(format!("cannot open {}: {e}", path.display()))
        })?;
        Self::apply_pragmas(&conn, busy_timeout_ms)?;

        Ok(Self::from_connection(conn))
    }

    /// Create an in-memory database, useful for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(format!("cannot open in-memory database: {e}")))?;
        Self::apply_pragmas(&conn, DEFAULT_BUSY_TIMEOUT_MS)?;

        Ok(Self::from_connection(conn))
    }

    /// Open the database and run all pending migrations.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        Self::open_and_migrate_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Like [`Database::open_and_migrate`] with an explicit busy timeout.
    pub async fn open_and_migrate_with_busy_timeout(
        path: impl AsRef<Path> + Send + 'static,
        busy_timeout_ms: u32,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db =
            tokio::task::spawn_blocking(move || Self::open_with_busy_timeout(&path, busy_timeout_ms))
                .await??;
        db.run_migrations().await?;
        Ok(db)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(|conn| migration::run_all(conn)).await
    }

    /// Close the connection.
    ///
    /// Fails with [`StoreError::AlreadyClosed`] if the handle was already
    /// closed. The slot is cleared even when SQLite reports an error while
    /// closing, so the handle is unusable afterwards either way.
    pub async fn close(&self) -> StoreResult<()> {
        let slot = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = lock(&slot)?.take().ok_or(StoreError::AlreadyClosed)?;
            conn.close().map_err(|(_, e)| {
                StoreError::Connection(format!("error while closing database: {e}"))
            })?;
            info!("database closed");
            Ok(())
        })
        .await?
    }

    /// Whether [`Database::close`] has been called on this handle or a clone.
    pub fn is_closed(&self) -> bool {
        match self.conn.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Execute an arbitrary closure against the connection on the blocking pool.
    ///
    /// This is the primary way to interact with the database from async code.
    /// The closure receives a `&Connection` and must return a `StoreResult<T>`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let count: i64 = db.execute(|conn| {
    ///     let count = conn.query_row("SELECT count(*) FROM bots", [], |row| row.get(0))?;
    ///     Ok(count)
    /// }).await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&slot)?;
            let conn = guard.as_ref().ok_or_else(closed)?;
            f(conn)
        })
        .await?
    }

    /// Execute a mutable closure (for transactions, etc.) on the blocking pool.
    ///
    /// The closure receives a `&mut Connection` so you can call
    /// `conn.transaction()` and friends.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&slot)?;
            let conn = guard.as_mut().ok_or_else(closed)?;
            f(conn)
        })
        .await?
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection, busy_timeout_ms: u32) -> StoreResult<()> {
        debug!("applying SQLite pragmas");

        let apply = || -> rusqlite::Result<()> {
            // WAL mode: concurrent readers, non-blocking writes.
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            // Bot and message ownership rely on these.
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
            Ok(())
        };
        apply().map_err(|e| StoreError::Connection(format!("cannot configure database: {e}")))?;

        info!(busy_timeout_ms, "database pragmas applied (WAL, foreign keys)");
        Ok(())
    }
}

fn lock(slot: &Slot) -> StoreResult<MutexGuard<'_, Option<Connection>>> {
    slot.lock()
        .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))
}

fn closed() -> StoreError {
    StoreError::Connection("database connection is closed".into())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = Database::open_in_memory().unwrap();
        let version: String = db
            .execute(|conn| {
                let v: String =
                    conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
                Ok(v)
            })
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let enabled: i64 = db
            .execute(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn migrations_run_on_fresh_db() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();

        let count: i64 = db
            .execute(|conn| {
                let c: i64 = conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn close_twice_fails_with_already_closed() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.is_closed());

        db.close().await.unwrap();
        assert!(db.is_closed());

        match db.close().await.unwrap_err() {
            StoreError::AlreadyClosed => {}
            other => panic!("expected AlreadyClosed, got: {other}"),
        }
    }

    #[tokio::test]
    async fn operations_after_close_fail_cleanly() {
        let db = Database::open_in_memory().unwrap();
        let clone = db.clone();
        db.close().await.unwrap();

        let result = clone.execute(|_| Ok(())).await;
        match result.unwrap_err() {
            StoreError::Connection(msg) => assert!(msg.contains("closed"), "got: {msg}"),
            other => panic!("expected Connection, got: {other}"),
        }

        let result = clone.execute_mut(|_| Ok(())).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[test]
    fn open_unreachable_path_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("eve.db");
        match Database::open(&path).unwrap_err() {
            StoreError::Connection(msg) => assert!(msg.contains("cannot open"), "got: {msg}"),
            other => panic!("expected Connection, got: {other}"),
        }
    }
}
