//! HTTP surface of the core: the stream gateway plus a health endpoint.
//!
//! The admin REST API lives in a collaborating service; it consumes the query
//! functions in `crate::data` rather than routes here.

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::stream::stream_ws;

/// Build the router for the web service.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(stream_ws))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Service health summary.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let statuses: serde_json::Map<String, serde_json::Value> = state
        .service_statuses
        .all()
        .into_iter()
        .map(|(name, status)| (name, json!(status)))
        .collect();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("GIT_COMMIT_SHORT"),
        "services": statuses,
    }))
}
