//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories, the runner and the lifecycle manager.

pub mod lifecycle;
pub mod pipeline;

// Re-export for convenience
pub use pipeline as pipeline_service;
