use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Accord - consensus and messaging for cooperating agents
#[derive(Parser)]
#[command(name = "accord")]
#[command(about = "Accord agent node and utilities")]
#[command(version)]
pub struct Cli {
    /// Log filter, overrides RUST_LOG (e.g. "debug" or "accord_comm=trace")
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an agent node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "accord.json")]
        config: PathBuf,
    },

    /// Initialize a new node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "accord.json")]
        output: PathBuf,

        /// Agent id for the node (random if omitted)
        #[arg(long)]
        agent_id: Option<String>,
    },

    /// Show node status
    Status {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,
    },

    /// Create a proposal on a running node
    Propose {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,

        /// Voting rule (simple_majority, super_majority, unanimous, weighted, delegated)
        #[arg(short = 't', long, default_value = "simple_majority")]
        consensus_type: String,

        /// Proposal payload as JSON
        #[arg(short, long, default_value = "null")]
        payload: String,

        /// Voting window in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Votes required before a decision
        #[arg(long)]
        quorum: Option<usize>,
    },

    /// Vote on a proposal
    Vote {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,

        /// Proposal id
        #[arg(long)]
        proposal: String,

        /// Voting agent
        #[arg(long)]
        voter: String,

        /// approve, reject or abstain
        #[arg(long)]
        decision: String,

        #[arg(long)]
        reasoning: Option<String>,
    },
}
