/// Handler catalog REST API endpoints
///
/// Lists the registered node types with their default config, input schema and
/// ports, for palettes and config forms.

use crate::api::AppState;
use crate::handlers::HandlerDescriptor;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};

/// Create handler catalog routes
pub fn create_catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/handlers", get(list_handlers))
        .route("/api/handlers/category/{category}", get(list_by_category))
}

/// GET /api/handlers
async fn list_handlers(State(state): State<AppState>) -> Json<Vec<HandlerDescriptor>> {
    Json(state.engine.registry().descriptors())
}

/// GET /api/handlers/category/{category}
async fn list_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Json<Vec<HandlerDescriptor>> {
    let handlers = state
        .engine
        .registry()
        .list_by_category(&category)
        .iter()
        .map(|handler| HandlerDescriptor::of(handler.as_ref()))
        .collect();
    Json(handlers)
}
