//! Bot companions.
//!
//! Every bot belongs to exactly one user. The owner is fixed at creation
//! and enforced by a foreign key; affection and mood are the only fields
//! that change afterwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::rows::collect_best_effort;

/// A stored bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: i64,
    pub name: String,
    /// Reference to the avatar image (path or URL).
    pub image: String,
    pub gender: String,
    /// Owning user's ID.
    pub user_id: i64,
    pub affection: f64,
    pub mood: f64,
}

/// Input for [`BotStore::create`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBot {
    pub name: String,
    pub image: String,
    pub gender: String,
    pub user_id: i64,
}

const BOT_COLUMNS: &str = "id, name, image, gender, user_id, affection, mood";

fn map_bot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bot> {
    Ok(Bot {
        id: row.get(0)?,
        name: row.get(1)?,
        image: row.get(2)?,
        gender: row.get(3)?,
        user_id: row.get(4)?,
        affection: row.get(5)?,
        mood: row.get(6)?,
    })
}

/// Create and list bots.
#[derive(Clone)]
pub struct BotStore {
    db: Database,
}

impl BotStore {
    /// Create a bot store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a bot and return it with its assigned ID.
    ///
    /// A missing owner violates the foreign key and fails with
    /// [`StoreError::Persistence`].
    #[instrument(skip(self, bot), fields(user_id = bot.user_id, name = %bot.name))]
    pub async fn create(&self, bot: NewBot) -> StoreResult<Bot> {
        let created = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO bots (name, image, gender, user_id) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![bot.name, bot.image, bot.gender, bot.user_id],
                )
                .map_err(StoreError::from)
                .inspect_err(|e| error!(error = %e, "cannot insert bot"))?;

                Ok(Bot {
                    id: conn.last_insert_rowid(),
                    name: bot.name,
                    image: bot.image,
                    gender: bot.gender,
                    user_id: bot.user_id,
                    affection: 0.0,
                    mood: 0.0,
                })
            })
            .await?;

        debug!(bot_id = created.id, "bot created");
        Ok(created)
    }

    /// All bots owned by `user_id`, in rowid order.
    ///
    /// Rows that fail to decode are skipped and logged.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: i64) -> StoreResult<Vec<Bot>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BOT_COLUMNS} FROM bots WHERE user_id = ?1 ORDER BY id"
                ))?;
                let rows = stmt.query_map(rusqlite::params![user_id], map_bot)?;
                collect_best_effort("bot", rows)
            })
            .await
    }

    /// Fetch one bot if `user_id` owns it.
    #[instrument(skip(self))]
    pub async fn get(&self, user_id: i64, bot_id: i64) -> StoreResult<Option<Bot>> {
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?1 AND user_id = ?2"),
                    rusqlite::params![bot_id, user_id],
                    map_bot,
                );
                match result {
                    Ok(bot) => Ok(Some(bot)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Set affection and mood on a bot owned by `user_id`.
    #[instrument(skip(self))]
    pub async fn update_feelings(
        &self,
        user_id: i64,
        bot_id: i64,
        affection: f64,
        mood: f64,
    ) -> StoreResult<()> {
        if !affection.is_finite() || !mood.is_finite() {
            return Err(StoreError::Validation(
                "affection and mood must be finite numbers".into(),
            ));
        }

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE bots SET affection = ?3, mood = ?4 WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![bot_id, user_id, affection, mood],
                )?;
                if updated == 0 {
                    return Err(StoreError::Ownership { user_id, bot_id });
                }
                Ok(())
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (Database, BotStore, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let ids = db
            .execute(|conn| {
                conn.execute(
                    "INSERT INTO users (name, password_hash, created_at) VALUES ('alice', 'x', 0)",
                    [],
                )?;
                let alice = conn.last_insert_rowid();
                conn.execute(
                    "INSERT INTO users (name, password_hash, created_at) VALUES ('bob', 'x', 0)",
                    [],
                )?;
                Ok((alice, conn.last_insert_rowid()))
            })
            .await
            .unwrap();
        (db.clone(), BotStore::new(db), ids.0, ids.1)
    }

    fn new_bot(name: &str, user_id: i64) -> NewBot {
        NewBot {
            name: name.into(),
            image: format!("/static/img/{name}.png"),
            gender: "female".into(),
            user_id,
        }
    }

    #[tokio::test]
    async fn create_assigns_id() {
        let (_db, store, alice, _) = setup().await;

        let rex = store.create(new_bot("Rex", alice)).await.unwrap();
        let max = store.create(new_bot("Max", alice)).await.unwrap();
        assert!(rex.id > 0);
        assert!(max.id > rex.id);
        assert_eq!(rex.user_id, alice);
        assert_eq!(rex.affection, 0.0);
        assert_eq!(rex.mood, 0.0);
    }

    #[tokio::test]
    async fn create_for_missing_user_is_persistence_error() {
        let (_db, store, _, _) = setup().await;

        let err = store.create(new_bot("Ghost", 999)).await.unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)), "got: {err}");
        assert!(err.is_constraint_violation());
    }

    #[tokio::test]
    async fn list_only_returns_own_bots() {
        let (_db, store, alice, bob) = setup().await;

        let rex = store.create(new_bot("Rex", alice)).await.unwrap();
        store.create(new_bot("Fido", bob)).await.unwrap();
        let max = store.create(new_bot("Max", alice)).await.unwrap();

        let bots = store.list_for_user(alice).await.unwrap();
        assert_eq!(bots, vec![rex, max]);

        assert!(store.list_for_user(12345).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_skips_undecodable_rows() {
        let (db, store, alice, _) = setup().await;

        let rex = store.create(new_bot("Rex", alice)).await.unwrap();
        store.create(new_bot("Broken", alice)).await.unwrap();
        db.execute(|conn| {
            conn.execute("UPDATE bots SET mood = 'very happy' WHERE name = 'Broken'", [])?;
            Ok(())
        })
        .await
        .unwrap();

        let bots = store.list_for_user(alice).await.unwrap();
        assert_eq!(bots, vec![rex]);
    }

    #[tokio::test]
    async fn get_is_owner_scoped() {
        let (_db, store, alice, bob) = setup().await;
        let rex = store.create(new_bot("Rex", alice)).await.unwrap();

        assert_eq!(store.get(alice, rex.id).await.unwrap(), Some(rex.clone()));
        assert!(store.get(bob, rex.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_feelings_requires_ownership() {
        let (_db, store, alice, bob) = setup().await;
        let rex = store.create(new_bot("Rex", alice)).await.unwrap();

        store.update_feelings(alice, rex.id, 0.5, -0.25).await.unwrap();
        let fetched = store.get(alice, rex.id).await.unwrap().unwrap();
        assert_eq!(fetched.affection, 0.5);
        assert_eq!(fetched.mood, -0.25);

        match store.update_feelings(bob, rex.id, 1.0, 1.0).await.unwrap_err() {
            StoreError::Ownership { user_id, bot_id } => {
                assert_eq!(user_id, bob);
                assert_eq!(bot_id, rex.id);
            }
            other => panic!("expected Ownership, got: {other}"),
        }

        assert!(matches!(
            store.update_feelings(alice, rex.id, f64::NAN, 0.0).await,
            Err(StoreError::Validation(_))
        ));
    }
}
