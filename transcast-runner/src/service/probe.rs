//! Input probing service
//!
//! Runs the prober against a source and returns its JSON description of
//! the container and streams.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use transcast_core::command::flag_args;
use transcast_core::domain::pipeline::Params;

/// Probe failure
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to run prober: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Prober failed with exit code {code:?}")]
    Failed {
        code: Option<i32>,
        stderr: Vec<String>,
    },

    #[error("Prober returned invalid JSON: {0}")]
    InvalidOutput(#[from] serde_json::Error),
}

impl ProbeError {
    /// Diagnostic lines from the prober's error stream
    pub fn description(&self) -> Vec<String> {
        match self {
            ProbeError::Failed { stderr, .. } => stderr.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// Service trait for probing media sources
#[async_trait]
pub trait ProbeService: Send + Sync {
    /// Probes a source
    ///
    /// # Arguments
    /// * `source` - URI or path of the media
    /// * `params` - Extra prober options, keyed by flag name
    ///
    /// # Returns
    /// The prober's JSON output, with at least a `streams` array
    async fn probe(&self, source: &str, params: &Params) -> Result<Value, ProbeError>;
}

/// ffprobe implementation of ProbeService
pub struct FfprobeService {
    binary: String,
}

impl FfprobeService {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ProbeService for FfprobeService {
    async fn probe(&self, source: &str, params: &Params) -> Result<Value, ProbeError> {
        let options: BTreeMap<String, Value> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let mut cmd = Command::new(&self.binary);
        cmd.args(["-show_format", "-show_streams", "-of", "json"])
            .args(flag_args(&options))
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Probing {}", source);
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string)
                .collect();
            warn!("Probe of {} failed: {:?}", source, output.status.code());
            return Err(ProbeError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
