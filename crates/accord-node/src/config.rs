use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use accord_comm::CommConfig;
use accord_consensus::{ConsensusConfig, DEFAULT_SUPER_MAJORITY_THRESHOLD};
use accord_core::AgentId;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity of this agent on the network
    pub agent_id: AgentId,

    /// Agent-to-agent TCP listen address
    pub listen_addr: SocketAddr,

    /// RPC bind address
    pub rpc_addr: SocketAddr,

    /// Enable WebSocket
    pub enable_ws: bool,

    #[serde(default)]
    pub consensus: ConsensusSettings,

    #[serde(default)]
    pub communication: CommSettings,

    /// Agents dialed on startup
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Per-agent base vote weights
    #[serde(default)]
    pub base_weights: HashMap<AgentId, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    pub default_timeout_ms: u64,
    pub default_quorum: usize,
    pub super_majority_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommSettings {
    pub handshake_timeout_ms: u64,
    pub max_retries: u32,
    pub heartbeat_interval_ms: u64,
    pub queue_bound: usize,
    pub max_routing_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub agent_id: AgentId,
    pub address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            agent_id: "agent".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7400)),
            rpc_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_ws: true,
            consensus: ConsensusSettings::default(),
            communication: CommSettings::default(),
            peers: Vec::new(),
            base_weights: HashMap::new(),
        }
    }
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        ConsensusSettings {
            default_timeout_ms: 30_000,
            default_quorum: 3,
            super_majority_threshold: DEFAULT_SUPER_MAJORITY_THRESHOLD,
        }
    }
}

impl Default for CommSettings {
    fn default() -> Self {
        CommSettings {
            handshake_timeout_ms: 10_000,
            max_retries: 3,
            heartbeat_interval_ms: 30_000,
            queue_bound: 1000,
            max_routing_depth: 16,
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            bail!("agent_id must not be empty");
        }
        if self.consensus.default_quorum == 0 {
            bail!("consensus.default_quorum must be at least 1");
        }
        if self.consensus.default_timeout_ms == 0 {
            bail!("consensus.default_timeout_ms must be positive");
        }
        let threshold = self.consensus.super_majority_threshold;
        if !(threshold > 0.5 && threshold <= 1.0) {
            bail!("consensus.super_majority_threshold must be in (0.5, 1], got {}", threshold);
        }
        if self.communication.heartbeat_interval_ms == 0 {
            bail!("communication.heartbeat_interval_ms must be positive");
        }
        if let Some(peer) = self.peers.iter().find(|p| p.agent_id == self.agent_id) {
            bail!("peer list contains this node's own agent id {}", peer.agent_id);
        }
        Ok(())
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            default_timeout: Duration::from_millis(self.consensus.default_timeout_ms),
            default_quorum: self.consensus.default_quorum,
            super_majority_threshold: self.consensus.super_majority_threshold,
            ..Default::default()
        }
    }

    pub fn comm_config(&self) -> CommConfig {
        CommConfig {
            agent_id: self.agent_id.clone(),
            handshake_timeout: Duration::from_millis(self.communication.handshake_timeout_ms),
            max_retries: self.communication.max_retries,
            heartbeat_interval: Duration::from_millis(self.communication.heartbeat_interval_ms),
            queue_bound: self.communication.queue_bound,
            max_routing_depth: self.communication.max_routing_depth,
            ..Default::default()
        }
    }
}

/// Random agent id such as `agent-3f9a01c2`
pub fn random_agent_id() -> AgentId {
    format!("agent-{}", hex::encode(rand::random::<[u8; 4]>()))
}

/// Generate a sample configuration
pub fn generate_sample_config(agent_id: Option<String>) -> NodeConfig {
    NodeConfig {
        agent_id: agent_id.unwrap_or_else(random_agent_id),
        peers: vec![PeerConfig {
            agent_id: "reviewer".to_string(),
            address: "127.0.0.1:7401".to_string(),
        }],
        base_weights: HashMap::from([("reviewer".to_string(), 2.0)]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consensus_config().default_quorum, 3);
        assert_eq!(config.comm_config().queue_bound, 1000);
    }

    #[test]
    fn test_sample_config() {
        let config = generate_sample_config(None);
        assert!(config.agent_id.starts_with("agent-"));
        assert_eq!(config.agent_id.len(), "agent-".len() + 8);
        assert_eq!(config.peers.len(), 1);
        assert!(config.validate().is_ok());

        let named = generate_sample_config(Some("planner".to_string()));
        assert_eq!(named.comm_config().agent_id, "planner");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{
            "agent_id": "planner",
            "listen_addr": "127.0.0.1:7500",
            "rpc_addr": "127.0.0.1:8500",
            "enable_ws": false,
            "consensus": { "default_quorum": 2 }
        }"#;
        let config: NodeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.consensus.default_quorum, 2);
        assert_eq!(config.consensus.default_timeout_ms, 30_000);
        assert_eq!(config.communication.max_retries, 3);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_validation() {
        let mut config = NodeConfig::default();
        config.consensus.super_majority_threshold = 0.4;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.peers.push(PeerConfig {
            agent_id: config.agent_id.clone(),
            address: "127.0.0.1:1".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("accord-config-{}.json", random_agent_id()));
        let config = generate_sample_config(Some("planner".to_string()));
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.agent_id, "planner");
        assert_eq!(loaded.peers, config.peers);
        assert_eq!(loaded.base_weights.get("reviewer"), Some(&2.0));

        std::fs::remove_file(&path).unwrap();
    }
}
