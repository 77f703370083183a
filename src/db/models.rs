use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Identifier and server timestamp assigned when a chat message is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct KnownUser {
    pub id: String,
    pub nickname: String,
    pub is_online: bool,
}

impl KnownUser {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>, is_online: bool) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            is_online,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ContactRow {
    pub peer_id: String,
    pub last_message_at: DateTime<Utc>,
}
