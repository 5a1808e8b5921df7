//! Durable, append-only chat message storage.

use std::collections::HashMap;

use async_trait::async_trait;
use campus_common::SnowflakeGenerator;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::chat_message::{ChatMessage, StoredMessage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),
    #[error("message store unavailable")]
    Unavailable,
}

/// Persistence for chat messages, keyed by room.
///
/// Backed by PostgreSQL in production and an in-memory map in tests or when
/// no database is configured.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and assign it a permanent id. Returns once the
    /// message is durable.
    async fn append(&self, message: ChatMessage) -> Result<StoredMessage, StoreError>;

    /// Full history of a room, oldest first. Unknown rooms are empty.
    async fn history(&self, room_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// `created_at` of the newest stored message in a room.
    async fn latest(&self, room_id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

pub struct MemoryMessageStore {
    ids: SnowflakeGenerator,
    rooms: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryMessageStore {
    pub fn new(worker_id: u16) -> Self {
        Self {
            ids: SnowflakeGenerator::new(worker_id),
            rooms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: ChatMessage) -> Result<StoredMessage, StoreError> {
        let mut rooms = self.rooms.write();
        // Generate under the lock so ids follow insertion order per room.
        let stored = StoredMessage::from_new(self.ids.generate(), message);
        rooms
            .entry(stored.room_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn history(&self, room_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let mut messages = self
            .rooms
            .read()
            .get(room_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }

    async fn latest(&self, room_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .rooms
            .read()
            .get(room_id)
            .and_then(|messages| messages.iter().map(|m| m.created_at).max()))
    }
}
