use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{KnownUser, StoredMessage};
use crate::error::DatabaseError;

/// Durable storage for direct chat messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message and returns the id and timestamp the store assigned.
    async fn insert_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<StoredMessage, DatabaseError>;
}

/// Account lookups and the persisted online flag.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_name(&self, user_id: &str) -> Result<String, DatabaseError>;

    async fn set_online(&self, user_id: &str, online: bool) -> Result<(), DatabaseError>;

    async fn list_known_users(&self) -> Result<Vec<KnownUser>, DatabaseError>;

    /// Most recent message time between `viewer_id` and each peer, in either
    /// direction. Peers without history are absent.
    async fn last_contact(
        &self,
        viewer_id: &str,
    ) -> Result<HashMap<String, DateTime<Utc>>, DatabaseError>;
}
