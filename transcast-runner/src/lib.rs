//! Transcast Runner
//!
//! Everything that touches external processes and the per-output record
//! store: probing inputs, supervising encoder processes, tracking output
//! state and uploading finished artifacts.

pub mod config;
pub mod repository;
pub mod service;

#[cfg(all(test, unix))]
mod testing;

pub use config::Config;
