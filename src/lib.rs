pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;

use std::sync::Arc;
use std::time::Duration;
use sqlx::PgPool;
use actix_web::{web, HttpResponse};
use tracing::{info, warn};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::Authenticator;
pub use db::{DbOperations, MessageStore, UserDirectory};
pub use hub::ChatHub;

/// Health check endpoint handler
/// Returns server status, timestamp and the number of live sessions
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let sessions = state.hub.registry().len().await;

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "sessions": sessions,
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub db_pool: Arc<PgPool>,
    pub hub: Arc<ChatHub>,
}

impl AppState {
    pub async fn new(config: Settings) -> Result<Self> {
        let db = DbOperations::new_with_options(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(5),
        )
        .await?;

        if config.database.run_migrations {
            db.run_migrations().await?;
        }

        match db.reset_presence().await {
            Ok(count) => info!("Reset online flag for {} users", count),
            Err(e) => warn!("Could not reset presence flags: {}", e),
        }

        let db_pool = db.pool();
        let db = Arc::new(db);
        let authenticator = Arc::new(Authenticator::new(
            config.auth.jwt_secret.clone(),
            config.auth.token_expiry_hours,
        ));
        let hub = Arc::new(ChatHub::new(
            config.hub.clone(),
            db.clone(),
            db,
            authenticator,
        ));

        Ok(Self::from_parts(config, db_pool, hub))
    }

    pub fn from_parts(config: Settings, db_pool: Arc<PgPool>, hub: Arc<ChatHub>) -> Self {
        Self {
            config: Arc::new(config),
            db_pool,
            hub,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.hub.shutdown().await;
        // Give session teardowns a moment to record presence before the pool goes away.
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.db_pool.close().await;
        Ok(())
    }
}
