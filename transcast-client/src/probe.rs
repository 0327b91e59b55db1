//! Probe API endpoint

use crate::OrchestratorClient;
use crate::error::Result;
use serde_json::Value;
use transcast_core::domain::pipeline::Params;
use transcast_core::dto::probe::ProbeRequest;

impl OrchestratorClient {
    /// Probe a media source
    ///
    /// # Returns
    /// The prober's JSON description of the container and its streams
    pub async fn probe(&self, source: &str, params: Option<Params>) -> Result<Value> {
        let url = format!("{}/probe", self.base_url);
        let request = ProbeRequest {
            source: source.to_string(),
            params,
        };
        let response = self.client.post(&url).json(&request).send().await?;

        self.handle_response(response).await
    }
}
