//! Core domain types
//!
//! This module contains the core domain structures used across Transcast crates.
//! A [`pipeline::Pipeline`] is pure data: it is what the registry persists and what
//! the runner reads to launch processes. Live process state never lives here.

pub mod pipeline;
pub mod status;
