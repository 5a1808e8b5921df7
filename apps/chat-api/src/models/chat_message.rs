use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::chat_messages;

/// A chat message accepted from a session but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = chat_messages)]
pub struct StoredMessage {
    pub id: i64,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn from_new(id: i64, message: ChatMessage) -> Self {
        Self {
            id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            body: message.body,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage<'a> {
    pub id: i64,
    pub room_id: &'a str,
    pub sender_id: &'a str,
    pub sender_name: Option<&'a str>,
    pub body: &'a str,
    pub created_at: DateTime<Utc>,
}
