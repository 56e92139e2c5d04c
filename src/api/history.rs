/// Run history REST API endpoints

use crate::api::{api_error, ApiError, AppState};
use crate::state::{ExecutionState, HistoryRecord};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of records (default 20)
    pub limit: Option<usize>,
}

/// Create history routes
pub fn create_history_routes() -> Router<AppState> {
    Router::new()
        .route("/api/history/{graph_id}", get(persisted_history))
        .route("/api/history/{graph_id}/recent", get(recent_history))
}

/// Persisted runs of a graph, most recent first
///
/// GET /api/history/{graph_id}?limit=20
async fn persisted_history(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(20).min(500);
    match state.history.list(&graph_id, limit).await {
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            tracing::error!("Failed to list history for {}: {}", graph_id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// Runs of a graph still held in memory, most recent first
///
/// GET /api/history/{graph_id}/recent
async fn recent_history(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
) -> Json<Vec<ExecutionState>> {
    let runs = state
        .engine
        .store()
        .history(Some(&graph_id))
        .into_iter()
        .map(|run| ExecutionState::clone(&run))
        .collect();
    Json(runs)
}
