/// HTTP API Layer
///
/// This module exposes the run control surface over REST. It handles:
/// - Starting, pausing, resuming and stopping runs
/// - Status, progress, node state and log queries
/// - Persisted and in-memory run history
/// - The handler catalog

use crate::{runtime::ExecutionEngine, state::HistoryStorage};
use axum::{http::StatusCode, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

// Run control and queries
pub mod runs;

// Run history endpoints
pub mod history;

// Handler catalog endpoints
pub mod catalog;

// Re-export router builders
pub use catalog::create_catalog_routes;
pub use history::create_history_routes;
pub use runs::create_run_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Engine driving runs; also owns the registry and the state store
    pub engine: Arc<ExecutionEngine>,
    /// Persisted run history
    pub history: Arc<dyn HistoryStorage>,
}

/// Error response shared by all endpoints
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}
