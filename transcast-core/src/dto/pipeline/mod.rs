//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{Output, Pipeline};
use crate::domain::status::{CompletionRecord, OutputStatus};

/// Receipt returned when a pipeline is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCreated {
    pub id: Uuid,
    /// Target locator per output, `null` where resolution failed
    pub outputs: Vec<Option<String>>,
}

impl From<&Pipeline> for PipelineCreated {
    fn from(pipeline: &Pipeline) -> Self {
        Self {
            id: pipeline.id,
            outputs: pipeline.target_locators(),
        }
    }
}

/// Current condition of one output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputReport {
    pub id: Uuid,
    pub command: Option<String>,
    pub status: OutputStatus,
    /// Tail of the encoder's error stream, growing while the process runs
    pub command_output: Option<Vec<String>>,
    pub command_retcode: Option<i32>,
    #[serde(default)]
    pub cancelled: bool,
    pub target: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// OS process id while the encoder runs under this orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl OutputReport {
    /// Builds a report from a persisted output and its completion record
    pub fn new(
        output: &Output,
        record: Option<&CompletionRecord>,
        command_output: Option<Vec<String>>,
    ) -> Self {
        Self {
            id: output.id,
            command: output.command_line().map(str::to_string),
            status: OutputStatus::of(output, record),
            command_output,
            command_retcode: record.and_then(|r| r.exit_code),
            cancelled: record.is_some_and(|r| r.cancelled),
            target: output.target.as_ref().map(|t| t.locator()),
            errors: output.errors.clone(),
            pid: None,
        }
    }
}

/// Lightweight pipeline summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub ttl: u64,
    pub outputs: usize,
}

impl From<&Pipeline> for PipelineSummary {
    fn from(pipeline: &Pipeline) -> Self {
        Self {
            id: pipeline.id,
            created_at: pipeline.created_at,
            ttl: pipeline.ttl,
            outputs: pipeline.outputs.len(),
        }
    }
}
