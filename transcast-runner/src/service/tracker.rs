//! Output state tracking
//!
//! Builds per-output reports from the persisted pipeline and the completion
//! records. Nothing here consults live process handles, so any request can
//! report on any pipeline.

use anyhow::Result;
use std::sync::Arc;
use transcast_core::domain::pipeline::{Output, Pipeline};
use transcast_core::dto::pipeline::OutputReport;

use crate::repository::RecordStore;

/// Derives output status and diagnostics from completion records
#[derive(Clone)]
pub struct OutputTracker {
    records: Arc<dyn RecordStore>,
    output_lines: usize,
}

impl OutputTracker {
    pub fn new(records: Arc<dyn RecordStore>, output_lines: usize) -> Self {
        Self {
            records,
            output_lines,
        }
    }

    /// Full report of an output
    pub async fn report(&self, output: &Output) -> Result<OutputReport> {
        if output.command.is_none() {
            return Ok(OutputReport::new(output, None, None));
        }

        // The log grows while the encoder runs, so it is tailed regardless of a record
        let record = self.records.read(output.id).await?;
        let command_output = self.records.tail(output.id, self.output_lines).await?;

        Ok(OutputReport::new(output, record.as_ref(), command_output))
    }

    /// Reports of every output, in pipeline order
    pub async fn reports(&self, pipeline: &Pipeline) -> Result<Vec<OutputReport>> {
        let mut reports = Vec::with_capacity(pipeline.outputs.len());
        for output in &pipeline.outputs {
            reports.push(self.report(output).await?);
        }
        Ok(reports)
    }
}
