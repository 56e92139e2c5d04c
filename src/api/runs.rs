/// Run control REST API endpoints
///
/// Starts runs from a graph snapshot and forwards pause/resume/stop to the
/// execution store. Lifecycle conditions (double start, pausing a finished run)
/// come back as 409 with the rejection message, never as a server error.

use crate::api::{api_error, ApiError, AppState};
use crate::error::{EngineError, Rejected};
use crate::graph::Graph;
use crate::state::{ExecutionState, LogEntry, NodeExecutionState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request body for starting a run
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub graph: Graph,
}

/// Response for a started run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub run_id: String,
    pub graph_id: String,
    pub total_nodes: usize,
}

/// Create run control routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/runs", post(start_run))
        .route("/api/runs/pause", post(pause_run))
        .route("/api/runs/resume", post(resume_run))
        .route("/api/runs/stop", post(stop_run))
        .route("/api/runs/status", get(run_status))
        .route("/api/runs/current", get(current_run))
        .route("/api/runs/nodes/{node_id}", get(node_state))
        .route("/api/runs/logs", get(list_logs).delete(clear_logs))
}

fn rejected(rejection: Rejected) -> ApiError {
    tracing::warn!("⚠️ Rejected run operation: {}", rejection);
    api_error(StatusCode::CONFLICT, rejection)
}

/// Start a run
///
/// POST /api/runs
/// Body: { "graph": { "id": "...", "nodes": [...], "edges": [...] } }
async fn start_run(
    State(state): State<AppState>,
    Json(payload): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    let graph_id = payload.graph.id.clone();
    let total_nodes = payload.graph.nodes.len();

    match state.engine.start(payload.graph) {
        Ok(handle) => {
            tracing::info!("🔥 Started run {} for graph {}", handle.run_id(), graph_id);
            Ok((
                StatusCode::ACCEPTED,
                Json(StartRunResponse {
                    run_id: handle.run_id().to_string(),
                    graph_id,
                    total_nodes,
                }),
            ))
        }
        Err(EngineError::Graph(e)) => {
            tracing::warn!("❌ Graph '{}' rejected: {}", graph_id, e);
            Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, e))
        }
        Err(EngineError::Rejected(e)) => Err(rejected(e)),
        Err(e) => {
            tracing::error!("Failed to start run for graph {}: {}", graph_id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// POST /api/runs/pause
async fn pause_run(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.engine.pause().map_err(rejected)?;
    Ok(Json(status_body(&state)))
}

/// POST /api/runs/resume
async fn resume_run(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.engine.resume().map_err(rejected)?;
    Ok(Json(status_body(&state)))
}

/// POST /api/runs/stop
async fn stop_run(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.engine.stop().map_err(rejected)?;
    Ok(Json(status_body(&state)))
}

/// GET /api/runs/status
/// Returns: { "status": "running", "runId": "...", "progress": { ... } }
async fn run_status(State(state): State<AppState>) -> Json<Value> {
    Json(status_body(&state))
}

fn status_body(state: &AppState) -> Value {
    let store = state.engine.store();
    json!({
        "status": store.execution_status(),
        "runId": store.current().map(|run| run.id.clone()),
        "progress": store.progress(),
    })
}

/// GET /api/runs/current
async fn current_run(State(state): State<AppState>) -> Result<Json<ExecutionState>, ApiError> {
    state
        .engine
        .store()
        .current()
        .map(|run| Json(ExecutionState::clone(&run)))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no run has been started"))
}

/// GET /api/runs/nodes/{node_id}
async fn node_state(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeExecutionState>, ApiError> {
    state
        .engine
        .store()
        .node_state(&node_id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no state for node '{}'", node_id)))
}

/// GET /api/runs/logs
async fn list_logs(State(state): State<AppState>) -> Json<Vec<LogEntry>> {
    Json(state.engine.store().logs())
}

/// DELETE /api/runs/logs
async fn clear_logs(State(state): State<AppState>) -> StatusCode {
    state.engine.store().clear_logs();
    StatusCode::NO_CONTENT
}
