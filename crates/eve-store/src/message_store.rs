//! Conversation history between a user and one of their bots.
//!
//! Writes validate the content length, then check bot ownership and insert
//! inside a single `IMMEDIATE` transaction so the owner cannot change
//! between check and insert. Messages are never updated or deleted.

use chrono::{DateTime, Utc};
use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::rows::{collect_best_effort, conversion_error};

/// Maximum message length in characters.
pub const MESSAGE_MAX_LENGTH: usize = 200;

/// Who wrote a message. Stored as `0` (bot) or `1` (user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Bot,
    User,
}

impl Sender {
    fn as_i64(self) -> i64 {
        match self {
            Self::Bot => 0,
            Self::User => 1,
        }
    }

    fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Bot),
            1 => Some(Self::User),
            _ => None,
        }
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub bot_id: i64,
    pub sender: Sender,
    /// Millisecond precision.
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub rating: Option<f64>,
}

/// Input for [`MessageStore::store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub bot_id: i64,
    pub sender: Sender,
    pub content: String,
    /// Defaults to the time of the write.
    pub timestamp: Option<DateTime<Utc>>,
    pub rating: Option<f64>,
}

impl NewMessage {
    /// A message with a server-assigned timestamp and no rating.
    pub fn new(bot_id: i64, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            bot_id,
            sender,
            content: content.into(),
            timestamp: None,
            rating: None,
        }
    }

    /// Pin the timestamp instead of using the time of the write.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach a rating.
    pub fn rated(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }
}

/// Check `1 <= chars(content) <= MESSAGE_MAX_LENGTH`.
fn validate_content(content: &str) -> StoreResult<()> {
    let len = content.chars().count();
    if len == 0 {
        return Err(StoreError::Validation("cannot store empty message".into()));
    }
    if len > MESSAGE_MAX_LENGTH {
        return Err(StoreError::Validation(format!(
            "message too long ({len} > {MESSAGE_MAX_LENGTH} characters)"
        )));
    }
    Ok(())
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sender: i64 = row.get(2)?;
    let sender =
        Sender::from_i64(sender).ok_or_else(|| conversion_error(2, format!("unknown sender {sender}")))?;
    let millis: i64 = row.get(3)?;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| conversion_error(3, format!("timestamp out of range: {millis}")))?;

    Ok(Message {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        sender,
        timestamp,
        content: row.get(4)?,
        rating: row.get(5)?,
    })
}

/// Append and read conversation messages.
#[derive(Clone)]
pub struct MessageStore {
    db: Database,
}

impl MessageStore {
    /// Create a message store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a message written in the conversation between `user_id` and
    /// `message.bot_id`.
    ///
    /// Fails with [`StoreError::Validation`] for empty or over-long content
    /// and with [`StoreError::Ownership`] if the bot is missing or belongs to
    /// someone else.
    #[instrument(skip(self, message), fields(bot_id = message.bot_id, sender = ?message.sender))]
    pub async fn store(&self, user_id: i64, message: NewMessage) -> StoreResult<Message> {
        validate_content(&message.content)?;
        if message.rating.is_some_and(|r| !r.is_finite()) {
            return Err(StoreError::Validation("rating must be a finite number".into()));
        }

        let requested = message.timestamp.unwrap_or_else(Utc::now);
        let millis = requested.timestamp_millis();
        let timestamp = DateTime::from_timestamp_millis(millis).unwrap_or(requested);
        let NewMessage {
            bot_id,
            sender,
            content,
            rating,
            ..
        } = message;

        let stored = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let owned: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM bots WHERE id = ?1 AND user_id = ?2)",
                    rusqlite::params![bot_id, user_id],
                    |row| row.get(0),
                )?;
                if !owned {
                    warn!(user_id, bot_id, "message rejected: bot not owned by user");
                    return Err(StoreError::Ownership { user_id, bot_id });
                }

                tx.execute(
                    "INSERT INTO messages (bot_id, sender, timestamp, content, rating) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![bot_id, sender.as_i64(), millis, content, rating],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;

                Ok(Message {
                    id,
                    bot_id,
                    sender,
                    timestamp,
                    content,
                    rating,
                })
            })
            .await?;

        debug!(message_id = stored.id, "message stored");
        Ok(stored)
    }

    /// The whole conversation, oldest first.
    ///
    /// A bot that `user_id` does not own yields an empty list. Rows that
    /// fail to decode are skipped and logged.
    #[instrument(skip(self))]
    pub async fn list(&self, user_id: i64, bot_id: i64) -> StoreResult<Vec<Message>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT m.id, m.bot_id, m.sender, m.timestamp, m.content, m.rating \
                     FROM messages m JOIN bots b ON b.id = m.bot_id \
                     WHERE m.bot_id = ?1 AND b.user_id = ?2 \
                     ORDER BY m.timestamp ASC, m.id ASC",
                )?;
                let rows = stmt.query_map(rusqlite::params![bot_id, user_id], map_message)?;
                collect_best_effort("message", rows)
            })
            .await
    }

    /// The most recent `limit` messages, oldest first.
    #[instrument(skip(self))]
    pub async fn list_recent(
        &self,
        user_id: i64,
        bot_id: i64,
        limit: u32,
    ) -> StoreResult<Vec<Message>> {
        self.db
            .execute(move |conn| {
                // Take the newest N, then re-order ascending.
                let mut stmt = conn.prepare(
                    "SELECT id, bot_id, sender, timestamp, content, rating FROM ( \
                         SELECT m.* FROM messages m JOIN bots b ON b.id = m.bot_id \
                         WHERE m.bot_id = ?1 AND b.user_id = ?2 \
                         ORDER BY m.timestamp DESC, m.id DESC LIMIT ?3 \
                     ) ORDER BY timestamp ASC, id ASC",
                )?;
                let rows =
                    stmt.query_map(rusqlite::params![bot_id, user_id, limit], map_message)?;
                collect_best_effort("message", rows)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
