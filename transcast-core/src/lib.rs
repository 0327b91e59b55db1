//! Transcast Core
//!
//! Core types and pure logic for the Transcast transcoding pipeline engine.
//!
//! This crate contains:
//! - Domain types: Pipeline, Input, Output, Channel and their lifecycle status
//! - DTOs: Data transfer objects for the HTTP surface
//! - Parser: turns a loosely typed request into a validated Pipeline
//! - Ports: ephemeral UDP port allocation for broadcast outputs
//! - Command: encoder argument synthesis, including filter graphs

pub mod command;
pub mod domain;
pub mod dto;
pub mod filter;
pub mod parser;
pub mod ports;
