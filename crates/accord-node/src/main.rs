use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod bridge;
mod cli;
mod config;
mod node;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { config } => {
            run_node(config).await?;
        }
        Commands::Init { output, agent_id } => {
            init_config(output, agent_id)?;
        }
        Commands::Status { endpoint } => {
            show_status(&endpoint).await?;
        }
        Commands::Propose {
            endpoint,
            consensus_type,
            payload,
            timeout_ms,
            quorum,
        } => {
            let payload: Value = serde_json::from_str(&payload).context("payload must be valid JSON")?;
            let body = json!({
                "consensus_type": consensus_type,
                "payload": payload,
                "timeout_ms": timeout_ms,
                "required_quorum": quorum,
            });
            post(&format!("{}/proposals", endpoint), body).await?;
        }
        Commands::Vote {
            endpoint,
            proposal,
            voter,
            decision,
            reasoning,
        } => {
            let body = json!({
                "voter": voter,
                "decision": decision,
                "reasoning": reasoning,
            });
            post(&format!("{}/proposals/{}/votes", endpoint, proposal), body).await?;
        }
    }

    Ok(())
}

/// Run an agent node
async fn run_node(config_path: PathBuf) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    let config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        error!(
            "Configuration file not found: {:?}. Run 'accord init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    };

    let node = Node::new(config)?;
    node.run().await?;

    Ok(())
}

/// Initialize a new configuration file
fn init_config(output: PathBuf, agent_id: Option<String>) -> Result<()> {
    info!("Generating sample configuration");

    let config = generate_sample_config(agent_id);
    config.save(&output)?;

    info!("Configuration saved to {:?}", output);

    println!("\nConfiguration file created: {}", output.display());
    println!("Agent id: {}", config.agent_id);
    println!("Edit the file to set peers and vote weights.");
    println!("\nTo start the node, run:");
    println!("  accord run --config {}", output.display());

    Ok(())
}

/// Show node status
async fn show_status(endpoint: &str) -> Result<()> {
    let url = format!("{}/status", endpoint);

    let response = reqwest::get(&url).await?;

    if response.status().is_success() {
        let status: Value = response.json().await?;
        println!("Node Status:");
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        error!("Failed to get status: {}", response.status());
    }

    Ok(())
}

async fn post(url: &str, body: Value) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client.post(url).json(&body).send().await?;

    let status = response.status();
    let result: Value = response.json().await?;
    if status.is_success() {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        error!("Request failed ({}):", status);
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
