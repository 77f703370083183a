use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::db::models::{ContactRow, KnownUser, StoredMessage};
use crate::db::store::{MessageStore, UserDirectory};
use crate::error::DatabaseError;

pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Marks every user offline. Nobody can hold a session across a restart,
    /// so flags left over from a previous process are stale.
    pub async fn reset_presence(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE users SET online_status = FALSE WHERE online_status")
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MessageStore for DbOperations {
    async fn insert_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<StoredMessage, DatabaseError> {
        let stored = sqlx::query_as::<_, StoredMessage>(
            r#"
            INSERT INTO messages (sender_id, receiver_id, content)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(stored)
    }
}

#[async_trait]
impl UserDirectory for DbOperations {
    async fn resolve_name(&self, user_id: &str) -> Result<String, DatabaseError> {
        let nickname: Option<String> =
            sqlx::query_scalar("SELECT nickname FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        nickname.ok_or(DatabaseError::NotFound)
    }

    async fn set_online(&self, user_id: &str, online: bool) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE users SET online_status = $1 WHERE id = $2")
            .bind(online)
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn list_known_users(&self) -> Result<Vec<KnownUser>, DatabaseError> {
        let users = sqlx::query_as::<_, KnownUser>(
            "SELECT id, nickname, online_status AS is_online FROM users",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(users)
    }

    async fn last_contact(
        &self,
        viewer_id: &str,
    ) -> Result<HashMap<String, DateTime<Utc>>, DatabaseError> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT CASE WHEN sender_id = $1 THEN receiver_id ELSE sender_id END AS peer_id,
                   MAX(created_at) AS last_message_at
            FROM messages
            WHERE sender_id = $1 OR receiver_id = $1
            GROUP BY peer_id
            "#,
        )
        .bind(viewer_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.peer_id, row.last_message_at))
            .collect())
    }
}
