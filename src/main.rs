use actix_web::{web, App, HttpServer};
use actix_cors::Cors;
use anyhow::Context;
use dotenv::dotenv;
use presence_hub::{health_check, AppState, Settings};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn cors_for(settings: &Settings) -> Cors {
    if !settings.cors.enabled {
        return Cors::default();
    }

    let cors = if settings.cors.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
    } else {
        Cors::default()
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://localhost:5174")
            .allowed_methods(vec!["GET"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
            .supports_credentials()
    };

    cors.max_age(settings.cors.max_age as usize)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Settings::new().context("loading configuration")?;
    info!("Configuration loaded successfully ({})", config.environment);

    let state = AppState::new(config.clone()).await.context("initializing application state")?;

    let hub_addr = format!("{}:{}", config.hub.host, config.hub.port);
    let listener = TcpListener::bind(&hub_addr)
        .await
        .with_context(|| format!("binding websocket listener on {}", hub_addr))?;
    info!("WebSocket hub accepting connections at ws://{}", hub_addr);
    tokio::spawn(state.hub.clone().serve(listener));

    info!("Starting HTTP server at {}:{}", config.server.host, config.server.port);
    let data = web::Data::new(state.clone());
    let http_config = config.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors_for(&http_config))
            .app_data(data.clone())
            .route("/health", web::get().to(health_check))
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .workers(config.server.workers as usize)
    .run();

    // Resolves on SIGINT/SIGTERM once actix has stopped its workers.
    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    info!("Shutting down");
    state.shutdown().await?;
    Ok(())
}
