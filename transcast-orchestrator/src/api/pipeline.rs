//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use transcast_core::dto::pipeline::{OutputReport, PipelineCreated, PipelineSummary};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::pipeline_service::PipelineService;

/// POST /pipeline
/// Create a pipeline and launch its outputs
pub async fn create_pipeline(
    State(service): State<Arc<PipelineService>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<PipelineCreated>> {
    let Json(req) = payload?;
    tracing::debug!("Creating pipeline");

    let created = service.create_pipeline(req).await?;
    tracing::info!(
        "Created pipeline {} with {} outputs",
        created.id,
        created.outputs.len()
    );

    Ok(Json(created))
}

/// GET /pipeline/list
/// List all pipelines
pub async fn list_pipelines(
    State(service): State<Arc<PipelineService>>,
) -> ApiResult<Json<Vec<PipelineSummary>>> {
    tracing::debug!("Listing all pipelines");

    let pipelines = service.list_pipelines().await?;
    Ok(Json(pipelines))
}

/// GET /pipeline/{id}
/// Report on every output of a pipeline
pub async fn get_pipeline(
    State(service): State<Arc<PipelineService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<OutputReport>>> {
    tracing::debug!("Getting pipeline: {}", id);

    let reports = service.get_pipeline(id).await?;
    Ok(Json(reports))
}

#[derive(Debug, Default, Deserialize)]
pub struct StopQuery {
    #[serde(default)]
    pub purge: bool,
}

/// DELETE /pipeline/{id}
/// Stop a pipeline, or purge it with `?purge=true`
pub async fn stop_pipeline(
    State(service): State<Arc<PipelineService>>,
    Path(id): Path<Uuid>,
    Query(query): Query<StopQuery>,
) -> ApiResult<Response> {
    if query.purge {
        tracing::info!("Purging pipeline: {}", id);
        service.purge_pipeline(id).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    tracing::info!("Stopping pipeline: {}", id);
    let reports = service.stop_pipeline(id).await?;
    Ok(Json(reports).into_response())
}
