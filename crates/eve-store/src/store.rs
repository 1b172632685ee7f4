//! All four stores over one shared [`Database`].

use tracing::info;

use crate::bot_store::BotStore;
use crate::config::StoreConfig;
use crate::db::Database;
use crate::error::StoreResult;
use crate::message_store::MessageStore;
use crate::session::SessionStore;
use crate::user_store::UserStore;

/// Entry point handed to the web layer.
#[derive(Clone)]
pub struct Store {
    pub db: Database,
    pub users: UserStore,
    pub sessions: SessionStore,
    pub bots: BotStore,
    pub messages: MessageStore,
}

impl Store {
    /// Open and migrate the database described by `config`.
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let db = Database::open_and_migrate_with_busy_timeout(
            config.database_path.clone(),
            config.busy_timeout_ms,
        )
        .await?;
        info!(path = %config.database_path.display(), "store ready");
        Ok(Self::from_database(db, config))
    }

    /// Build the stores over an already-migrated database.
    pub fn from_database(db: Database, config: &StoreConfig) -> Self {
        Self {
            users: UserStore::with_hashing(db.clone(), config.hashing),
            sessions: SessionStore::with_config(db.clone(), config.session),
            bots: BotStore::new(db.clone()),
            messages: MessageStore::new(db.clone()),
            db,
        }
    }

    /// Close the shared connection; every store fails cleanly afterwards.
    pub async fn close(&self) -> StoreResult<()> {
        self.db.close().await
    }
}
