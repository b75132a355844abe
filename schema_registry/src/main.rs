mod config;
mod error;
mod handlers;
mod repository;
mod semver;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{RegistryError, Result};
use handlers::AppState;
use repository::{RedisRepository, Repository};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    // Valkey speaks the same wire protocol as Redis, so both backends share
    // `RedisRepository`; the config selector exists purely so deployment
    // manifests can say which store they mean.
    let (_backend, server) = config.repository.resolve()?;
    let repository: Arc<dyn Repository> = Arc::new(RedisRepository::connect(&server).await?);

    let state = Arc::new(AppState { repository });

    let app = Router::new()
        .route("/healthz", get(handlers::health))
        .route(
            "/schemas/:name/:version",
            post(handlers::create_schema)
                .get(handlers::get_schema)
                .delete(handlers::delete_schema),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|e| RegistryError::Config(format!("failed to bind {}: {e}", config.server.bind_address)))?;

    tracing::info!(address = %config.server.bind_address, "schema registry listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| RegistryError::Config(e.to_string()))?;

    Ok(())
}
