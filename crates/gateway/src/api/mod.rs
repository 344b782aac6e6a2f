//! HTTP surface: the health endpoint and the WebSocket client channel.

pub mod auth;
pub mod ws;

use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

/// Build the application router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::client_ws))
}

/// GET /health — readiness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
