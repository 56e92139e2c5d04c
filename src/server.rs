/// Server setup and initialization
///
/// Wires together all components: history storage, handler registry, execution
/// store, execution engine, and HTTP routes. Provides the main application factory
/// function for creating the Axum app.

use crate::{
    api::{create_catalog_routes, create_history_routes, create_run_routes, AppState},
    config::Config,
    handlers::HandlerRegistry,
    runtime::ExecutionEngine,
    state::{ExecutionStore, HistoryStorage, SqliteHistoryStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the router over already constructed components
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Run control and queries
        .merge(create_run_routes())
        // Persisted and in-memory history
        .merge(create_history_routes())
        // Handler catalog
        .merge(create_catalog_routes())
        .with_state(state)
}

/// Create the main Axum application with all routes
///
/// Initializes all components and wires them together into a complete application.
pub async fn create_app(config: Config) -> Result<Router> {
    // Ensure data directory exists
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    tracing::info!("🗄️ Initializing history storage");
    let db_path = Path::new(&config.database.data_dir).join("history.db");
    let history: Arc<dyn HistoryStorage> = Arc::new(
        SqliteHistoryStorage::connect(&db_path, config.database.history_retention)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open history database: {}", e))?,
    );

    tracing::info!("📊 Initializing handler registry");
    let registry = Arc::new(HandlerRegistry::with_builtins());

    tracing::info!("🚀 Initializing execution engine (policy: {})", config.engine.failure_policy);
    let store = Arc::new(ExecutionStore::new(config.store.clone()));
    let engine = Arc::new(
        ExecutionEngine::new(registry, store, config.engine.clone())
            .with_history_storage(Arc::clone(&history)),
    );

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = create_router(AppState { engine, history });

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting NodeFlow server...");

    // Create the application
    let app = create_app(config.clone()).await?;

    // Bind to the configured address
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    // Start the server
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
