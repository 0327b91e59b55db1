//! Pipeline command handlers
//!
//! Handles pipeline creation, listing, reporting, stopping and purging.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use serde_json::Value;
use transcast_client::{OrchestratorClient, OutputReport, PipelineSummary};
use transcast_core::domain::status::OutputStatus;

use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;
use crate::types::IdOrPrefix;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create and launch a pipeline from a JSON request file
    Create {
        /// Path to the JSON request
        file: String,
    },
    /// List all pipelines
    List,
    /// Show the status of every output
    Get {
        /// Pipeline ID or unambiguous prefix
        id: IdOrPrefix,
    },
    /// Stop every running output
    Stop {
        /// Pipeline ID or unambiguous prefix
        id: IdOrPrefix,
    },
    /// Stop a pipeline and delete it with its artifacts
    Purge {
        /// Pipeline ID or unambiguous prefix
        id: IdOrPrefix,
    },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.server_url);

    match command {
        PipelineCommands::Create { file } => create_pipeline(&client, &file).await,
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Stop { id } => stop_pipeline(&client, &id).await,
        PipelineCommands::Purge { id } => purge_pipeline(&client, &id).await,
    }
}

async fn create_pipeline(client: &OrchestratorClient, path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file: {}", path))?;
    let request: Value = serde_json::from_str(&content)
        .with_context(|| format!("Request file is not valid JSON: {}", path))?;

    let created = match client.create_pipeline(&request).await {
        Ok(created) => created,
        Err(e) => {
            for line in e.description() {
                eprintln!("  {}", line.dimmed());
            }
            return Err(e).context("Failed to create pipeline");
        }
    };

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:      {}", created.id.to_string().cyan());
    println!("  Outputs:");
    for (index, target) in created.outputs.iter().enumerate() {
        match target {
            Some(locator) => println!("    {} {}", format!("[{}]", index).dimmed(), locator),
            None => println!(
                "    {} {}",
                format!("[{}]", index).dimmed(),
                "unresolved".red()
            ),
        }
    }

    Ok(())
}

async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in &pipelines {
            print_pipeline_summary(pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, id: &IdOrPrefix) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;

    let reports = client.get_pipeline(uuid).await?;

    println!("{} {}", "Pipeline".bold(), uuid.to_string().cyan());
    print_reports(&reports);

    Ok(())
}

async fn stop_pipeline(client: &OrchestratorClient, id: &IdOrPrefix) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;

    let reports = client.stop_pipeline(uuid).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} stopped", uuid).green().bold()
    );
    print_reports(&reports);

    Ok(())
}

async fn purge_pipeline(client: &OrchestratorClient, id: &IdOrPrefix) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;

    client.purge_pipeline(uuid).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} purged", uuid).green().bold()
    );

    Ok(())
}

fn print_pipeline_summary(pipeline: &PipelineSummary) {
    println!("  {} {}", "▸".cyan(), pipeline.id.to_string().bold());
    println!(
        "    Created: {}",
        pipeline
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    let ttl = if pipeline.ttl == 0 {
        "none".to_string()
    } else {
        format!("{}s", pipeline.ttl)
    };
    println!("    TTL:     {}", ttl.dimmed());
    println!("    Outputs: {}", pipeline.outputs.to_string().dimmed());
    println!();
}

fn print_reports(reports: &[OutputReport]) {
    for report in reports {
        println!();
        println!(
            "  {} {} {}",
            "▸".cyan(),
            report.id.to_string().bold(),
            colored_status(report.status)
        );
        if let Some(target) = &report.target {
            println!("    Target:  {}", target);
        }
        if let Some(command) = &report.command {
            println!("    Command: {}", command.dimmed());
        }
        if let Some(pid) = report.pid {
            println!("    PID:     {}", pid);
        }
        if let Some(code) = report.command_retcode {
            println!("    Exit:    {}", code);
        }
        if report.cancelled {
            println!("    {}", "Stopped on request".yellow());
        }
        for error in &report.errors {
            println!("    {} {}", "✗".red(), error);
        }
        if let Some(lines) = &report.command_output {
            if !lines.is_empty() {
                println!("    {}", "─".repeat(60).dimmed());
                for line in lines {
                    println!("    {}", line.dimmed());
                }
                println!("    {}", "─".repeat(60).dimmed());
            }
        }
    }
}

fn colored_status(status: OutputStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        OutputStatus::Created => label.dimmed(),
        OutputStatus::Running => label.yellow(),
        OutputStatus::Finished => label.green(),
        OutputStatus::Error => label.red(),
    }
}
