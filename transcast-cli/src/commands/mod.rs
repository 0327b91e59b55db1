//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipeline;
mod probe;

pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Describe the container and streams of a media source
    Probe {
        /// URI or path of the media
        source: String,

        /// Extra prober options as key=value pairs
        #[arg(short, long, value_parser = probe::parse_key_val)]
        param: Vec<(String, String)>,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Probe { source, param } => probe::probe_source(config, &source, param).await,
    }
}
