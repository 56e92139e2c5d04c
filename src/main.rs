/// NodeFlow: workflow graph execution engine
///
/// Main entry point for the NodeFlow server. Loads configuration from the environment
/// and starts the HTTP server exposing the run control surface.

use nodeflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Run control at /api/runs/*
/// - Run history at /api/history/{graph_id}
/// - Handler catalog at /api/handlers
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3004 and ./data/history.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
