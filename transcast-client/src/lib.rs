//! Transcast HTTP Client
//!
//! A type-safe HTTP client for the Transcast orchestrator API.
//!
//! # Example
//!
//! ```no_run
//! use transcast_client::OrchestratorClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> transcast_client::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:5552");
//!
//!     let created = client
//!         .create_pipeline(&json!({
//!             "input_file": {"source": "in.mp4"},
//!             "outputs": [{"container": "mp4"}]
//!         }))
//!         .await?;
//!
//!     println!("Created pipeline: {}", created.id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod pipelines;
mod probe;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use transcast_core::dto::pipeline::{OutputReport, PipelineCreated, PipelineSummary};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Transcast orchestrator API
///
/// Methods are grouped into probing and pipeline management
/// (create, list, report, stop, purge).
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:5552")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API (e.g., "http://localhost:5552")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response without a body
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::debug!("Request failed with status {}: {}", status, body);
        Err(ClientError::from_body(status.as_u16(), &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:5552");
        assert_eq!(client.base_url(), "http://localhost:5552");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:5552/");
        assert_eq!(client.base_url(), "http://localhost:5552");
    }

    #[test]
    fn test_client_with_custom_client() {
        let client = OrchestratorClient::with_client("http://localhost:5552", Client::new());
        assert_eq!(client.base_url(), "http://localhost:5552");
    }
}
