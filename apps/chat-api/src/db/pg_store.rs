use std::sync::Arc;

use async_trait::async_trait;
use campus_common::SnowflakeGenerator;
use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::pool::DbPool;
use crate::db::schema::chat_messages;
use crate::models::chat_message::{ChatMessage, NewChatMessage, StoredMessage};

use super::store::{MessageStore, StoreError};

/// PostgreSQL-backed message store (`chat_messages` table).
pub struct PgMessageStore {
    pool: DbPool,
    ids: Arc<SnowflakeGenerator>,
}

impl PgMessageStore {
    pub fn new(pool: DbPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, ids }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: ChatMessage) -> Result<StoredMessage, StoreError> {
        let mut conn = self.pool.get().await?;

        let stored = diesel::insert_into(chat_messages::table)
            .values(NewChatMessage {
                id: self.ids.generate(),
                room_id: &message.room_id,
                sender_id: &message.sender_id,
                sender_name: message.sender_name.as_deref(),
                body: &message.body,
                created_at: message.created_at,
            })
            .returning(StoredMessage::as_returning())
            .get_result(&mut conn)
            .await?;

        Ok(stored)
    }

    async fn history(&self, room_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let mut conn = self.pool.get().await?;

        let messages = chat_messages::table
            .filter(chat_messages::room_id.eq(room_id))
            .order((chat_messages::created_at.asc(), chat_messages::id.asc()))
            .select(StoredMessage::as_select())
            .load(&mut conn)
            .await?;

        Ok(messages)
    }

    async fn latest(&self, room_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut conn = self.pool.get().await?;

        let latest = chat_messages::table
            .filter(chat_messages::room_id.eq(room_id))
            .select(max(chat_messages::created_at))
            .get_result(&mut conn)
            .await?;

        Ok(latest)
    }
}
