//! Schema migration system.
//!
//! Migrations are stored as static SQL strings keyed by version number.
//! The current version is tracked in a `_migrations` table so migrations
//! are idempotent and only run once.

use std::time::Instant;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema: users, bots, messages",
        sql: r#"
            CREATE TABLE users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                name          TEXT NOT NULL UNIQUE CHECK(name <> ''),
                password_hash TEXT NOT NULL,
                session_key   TEXT,
                created_at    INTEGER NOT NULL
            );

            CREATE TABLE bots (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                name      TEXT NOT NULL,
                image     TEXT NOT NULL DEFAULT '',
                gender    TEXT NOT NULL DEFAULT '',
                user_id   INTEGER NOT NULL REFERENCES users(id),
                affection REAL NOT NULL DEFAULT 0,
                mood      REAL NOT NULL DEFAULT 0
            );
            CREATE INDEX idx_bots_user ON bots(user_id);

            CREATE TABLE messages (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_id    INTEGER NOT NULL REFERENCES bots(id),
                sender    INTEGER NOT NULL CHECK(sender IN (0, 1)),
                timestamp INTEGER NOT NULL,
                content   TEXT NOT NULL,
                rating    REAL
            );
            CREATE INDEX idx_messages_bot_time ON messages(bot_id, timestamp);
        "#,
    },
    Migration {
        version: 2,
        description: "unique session keys",
        sql: r#"
            CREATE UNIQUE INDEX idx_users_session_key ON users(session_key)
                WHERE session_key IS NOT NULL;
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Schema version this build expects.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Bring the schema on `conn` up to [`latest_version`].
///
/// Synchronous; the async [`Database`](crate::Database) calls it from
/// `spawn_blocking`. A database already migrated past this build is refused
/// rather than used with a schema the queries do not know.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let latest = latest_version();
    if current > latest {
        error!(current, latest, "database schema is newer than this build");
        return Err(StoreError::Migration {
            version: current,
            message: format!("schema v{current} is newer than supported v{latest}"),
        });
    }
    if current == latest {
        debug!(version = current, "schema up to date");
        return Ok(());
    }

    info!(from = current, to = latest, "migrating schema");
    MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .try_for_each(|m| apply(conn, m))
}

/// Highest applied migration version, 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
        row.get(0)
    })
    .map_err(step_error(0, "cannot read schema version"))
}

// ── internals ────────────────────────────────────────────────────────

/// Map a SQLite failure during `version` into a [`StoreError::Migration`].
fn step_error(version: u32, step: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::Migration {
        version,
        message: format!("{step}: {e}"),
    }
}

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(step_error(0, "cannot create _migrations"))
}

/// Apply one migration and record it, atomically.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    let version = migration.version;
    let started = Instant::now();

    // `Connection::transaction` wants `&mut`; the runner only has `&`.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(step_error(version, "cannot begin transaction"))?;

    let applied = conn
        .execute_batch(migration.sql)
        .map_err(step_error(version, "schema change failed"))
        .and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![version, migration.description, Utc::now().timestamp()],
            )
            .map_err(step_error(version, "cannot record version"))
        });

    if let Err(err) = applied {
        warn!(version, %err, "migration failed, rolling back");
        if let Err(rollback) = conn.execute_batch("ROLLBACK;") {
            error!(version, %rollback, "rollback failed; connection may hold an open transaction");
        }
        return Err(err);
    }

    conn.execute_batch("COMMIT;")
        .map_err(step_error(version, "cannot commit"))?;
    info!(
        version,
        description = migration.description,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "migration applied"
    );
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[1].version > window[0].version,
                "migration versions must be strictly increasing: {} >= {}",
                window[0].version,
                window[1].version,
            );
        }
    }

    /// The expected latest migration version (update when adding migrations).
    const LATEST_VERSION: u32 = 2;

    #[test]
    fn latest_version_matches_table() {
        assert_eq!(latest_version(), LATEST_VERSION);
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (99, 'future', 0)",
            [],
        )
        .unwrap();

        match run_all(&conn).unwrap_err() {
            StoreError::Migration { version, .. } => assert_eq!(version, 99),
            other => panic!("expected Migration, got: {other}"),
        }
    }

    #[test]
    fn failed_migration_rolls_back() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let broken = Migration {
            version: LATEST_VERSION + 1,
            description: "half-applied change",
            sql: "CREATE TABLE scratch (id INTEGER); INSERT INTO no_such_table VALUES (1);",
        };
        let err = apply(&conn, &broken).unwrap_err();
        assert!(matches!(err, StoreError::Migration { version, .. } if version == LATEST_VERSION + 1));

        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
        let scratch: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE name = 'scratch'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(scratch, 0);
        // No transaction left open.
        assert!(conn.is_autocommit());
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '\\_%' ESCAPE '\\' \
                     AND name NOT LIKE 'sqlite%' ORDER BY name",
                )
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };

        assert_eq!(tables, vec!["bots", "messages", "users"]);
    }

    #[test]
    fn bot_owner_must_exist() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let orphan = conn.execute(
            "INSERT INTO bots (name, image, gender, user_id) VALUES ('Rex', '', '', 42)",
            [],
        );
        assert!(orphan.is_err());
    }

    #[test]
    fn sender_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO users (name, password_hash, created_at) VALUES ('alice', 'x', 0);
             INSERT INTO bots (name, user_id) VALUES ('Rex', 1);",
        )
        .unwrap();

        let bad_sender = conn.execute(
            "INSERT INTO messages (bot_id, sender, timestamp, content) VALUES (1, 2, 0, 'hi')",
            [],
        );
        assert!(bad_sender.is_err());

        conn.execute(
            "INSERT INTO messages (bot_id, sender, timestamp, content) VALUES (1, 1, 0, 'hi')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn session_keys_are_unique_but_nullable() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO users (name, password_hash, created_at) VALUES ('a', 'x', 0);
             INSERT INTO users (name, password_hash, created_at) VALUES ('b', 'x', 0);
             UPDATE users SET session_key = 'k1' WHERE name = 'a';",
        )
        .unwrap();

        let clash = conn.execute("UPDATE users SET session_key = 'k1' WHERE name = 'b'", []);
        assert!(clash.is_err());

        let empty_name = conn.execute(
            "INSERT INTO users (name, password_hash, created_at) VALUES ('', 'x', 0)",
            [],
        );
        assert!(empty_name.is_err());
    }
}
