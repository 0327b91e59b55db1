//! Probe DTOs

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::Params;

/// Request to probe a media source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub source: String,
    #[serde(default)]
    pub params: Option<Params>,
}
