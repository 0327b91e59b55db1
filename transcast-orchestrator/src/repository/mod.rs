//! Repository Module
//!
//! Data access layer for the orchestrator.
//! The registry holds one immutable snapshot per pipeline.

pub mod pipeline;

// Re-export for convenience
pub use pipeline as pipeline_repository;
