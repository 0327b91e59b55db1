//! Data Transfer Objects for the HTTP surface
//!
//! This module contains DTOs exchanged between the orchestrator and its
//! clients. DTOs are lightweight views over domain entities: pipeline
//! creation receipts, per-output reports and probe requests.

pub mod pipeline;
pub mod probe;
