//! Probe API Handler

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde_json::Value;
use std::sync::Arc;
use transcast_core::dto::probe::ProbeRequest;

use crate::api::error::ApiResult;
use crate::service::pipeline_service::PipelineService;

/// POST /probe
/// Run the prober against a source and return its description verbatim
pub async fn probe_source(
    State(service): State<Arc<PipelineService>>,
    payload: Result<Json<ProbeRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    tracing::debug!("Probing source: {}", req.source);

    let params = req.params.unwrap_or_default();
    let description = service.probe(&req.source, &params).await?;
    Ok(Json(description))
}
