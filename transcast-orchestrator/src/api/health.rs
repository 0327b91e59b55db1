//! Health Check API Handlers
//!
//! Liveness endpoints and the service index.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::{Value, json};

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /ping
pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /
/// Lists the available endpoints
pub async fn index() -> Json<Value> {
    Json(json!({
        "info": format!("transcast orchestrator {}", env!("CARGO_PKG_VERSION")),
        "urls": [
            "GET /health",
            "GET /ping",
            "POST /probe",
            "POST /pipeline",
            "GET /pipeline/list",
            "GET /pipeline/{id}",
            "DELETE /pipeline/{id}[?purge=true]",
        ]
    }))
}
