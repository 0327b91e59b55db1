//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use serde_json::Value;
use transcast_core::dto::pipeline::{OutputReport, PipelineCreated, PipelineSummary};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Create a pipeline from a declarative request and launch it
    ///
    /// # Returns
    /// The pipeline id and one target locator per output
    pub async fn create_pipeline(&self, request: &Value) -> Result<PipelineCreated> {
        let url = format!("{}/pipeline", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        self.handle_response(response).await
    }

    /// List all pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let url = format!("{}/pipeline/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get per-output reports of a pipeline
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<OutputReport>> {
        let url = format!("{}/pipeline/{}", self.base_url, pipeline_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Stop every running output of a pipeline
    ///
    /// # Returns
    /// The reports after the stop grace period
    pub async fn stop_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<OutputReport>> {
        let url = format!("{}/pipeline/{}", self.base_url, pipeline_id);
        let response = self.client.delete(&url).send().await?;

        self.handle_response(response).await
    }

    /// Stop a pipeline and delete it with its artifacts
    pub async fn purge_pipeline(&self, pipeline_id: Uuid) -> Result<()> {
        let url = format!("{}/pipeline/{}", self.base_url, pipeline_id);
        let response = self
            .client
            .delete(&url)
            .query(&[("purge", "true")])
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
