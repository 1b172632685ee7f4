//! # eve-store
//!
//! Persistence and identity core for Eve.
//!
//! Authenticates users, issues and resolves session keys, and stores each
//! user's bot companions together with the messages exchanged with them.
//! Everything lives in one SQLite database (WAL mode, foreign keys on).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Store (facade handed to the web layer)      │
//! ├───────────┬──────────────┬──────────┬────────┤
//! │ UserStore │ SessionStore │ BotStore │ Msgs   │
//! ├───────────┴──────────────┴──────────┴────────┤
//! │  Database (rusqlite + spawn_blocking)        │
//! │  Migrations (versioned, transactional)       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use eve_store::{NewBot, NewMessage, Sender, Store, StoreConfig};
//!
//! let store = Store::open(&StoreConfig::default()).await?;
//! let alice = store.users.create("alice", "pw123").await?;
//! let key = store.sessions.issue(alice.id).await?;
//! let rex = store.bots.create(NewBot { name: "Rex".into(), user_id: alice.id, ..Default::default() }).await?;
//! store.messages.store(alice.id, NewMessage::new(rex.id, Sender::User, "hi")).await?;
//! ```

pub mod bot_store;
pub mod config;
pub mod db;
pub mod error;
pub mod message_store;
pub mod migration;
mod rows;
pub mod session;
pub mod store;
pub mod user_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use bot_store::{Bot, BotStore, NewBot};
pub use config::{HashingConfig, SessionConfig, StoreConfig};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use message_store::{MESSAGE_MAX_LENGTH, Message, MessageStore, NewMessage, Sender};
pub use session::{SessionStore, generate_session_key};
pub use store::Store;
pub use user_store::{User, UserStore};
