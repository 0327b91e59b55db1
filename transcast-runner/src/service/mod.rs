//! Service layer
//!
//! Services drive the external binaries: the prober, the encoder and the
//! uploader. The supervisor owns live encoder processes and the tracker reads
//! back what they left behind.
//!
//! Collaborators at process boundaries are trait-based to enable testing.

mod probe;
mod supervisor;
mod tracker;
mod upload;

// Re-export traits
pub use probe::ProbeService;
pub use upload::UploadService;

// Re-export implementations
pub use probe::FfprobeService;
pub use supervisor::Supervisor;
pub use tracker::OutputTracker;
pub use upload::RcloneUploadService;

// Re-export errors
pub use probe::ProbeError;
pub use supervisor::SupervisorError;
pub use upload::UploadError;
