//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod probe;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::pipeline_service::PipelineService;

/// Create the main API router with all endpoints
pub fn create_router(service: Arc<PipelineService>) -> Router {
    Router::new()
        // Health check
        .route("/", get(health::index))
        .route("/health", get(health::health_check))
        .route("/ping", get(health::ping))
        // Probe endpoint
        .route("/probe", post(probe::probe_source))
        // Pipeline endpoints
        .route("/pipeline", post(pipeline::create_pipeline))
        .route("/pipeline/list", get(pipeline::list_pipelines))
        .route(
            "/pipeline/{id}",
            get(pipeline::get_pipeline).delete(pipeline::stop_pipeline),
        )
        // Add state and middleware
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}
