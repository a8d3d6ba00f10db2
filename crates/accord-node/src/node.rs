use std::sync::Arc;
use std::time::Duration;

use accord_comm::CommunicationManager;
use accord_consensus::{ConsensusManager, LivenessWeight, RemoteProposals};
use accord_rpc::{RpcConfig, RpcServer};
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::bridge::{self, Announcement, BroadcastNotifier};
use crate::config::{NodeConfig, PeerConfig};

/// Delay between dial attempts to a static peer
const PEER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// One agent: consensus, messaging and the RPC surface
pub struct Node {
    config: NodeConfig,
    consensus: Arc<ConsensusManager>,
    comm: Arc<CommunicationManager>,
    remote: Arc<RemoteProposals>,
    announcements: mpsc::UnboundedReceiver<Announcement>,
}

impl Node {
    /// Create a new node from configuration
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let (notifier, announcements) = BroadcastNotifier::channel();
        let weights = LivenessWeight::with_base_weights(config.base_weights.clone());
        let consensus = Arc::new(
            ConsensusManager::new(config.consensus_config())
                .with_notifier(Arc::new(notifier))
                .with_weight_policy(Arc::new(weights)),
        );
        let comm = Arc::new(CommunicationManager::new(config.comm_config()));

        Ok(Node {
            config,
            consensus,
            comm,
            remote: Arc::new(RemoteProposals::new()),
            announcements,
        })
    }

    /// Run the node
    pub async fn run(self) -> Result<()> {
        info!("Starting agent {}", self.config.agent_id);

        let inbound = bridge::register_inbound(&self.comm).await;
        tokio::spawn(bridge::run_inbound(
            Arc::clone(&self.consensus),
            Arc::clone(&self.remote),
            inbound,
        ));
        tokio::spawn(bridge::run_announcements(Arc::clone(&self.comm), self.announcements));

        let listen_addr = self.comm.listen(&self.config.listen_addr.to_string()).await?;
        info!("Agent {} reachable at {}", self.config.agent_id, listen_addr);

        for peer in self.config.peers.iter().cloned() {
            tokio::spawn(dial_peer(Arc::clone(&self.comm), peer));
        }

        let heartbeat = tokio::spawn(Arc::clone(&self.comm).run_heartbeat());

        let rpc_config = RpcConfig {
            http_addr: self.config.rpc_addr,
            enable_ws: self.config.enable_ws,
        };
        let rpc_server = RpcServer::new(
            rpc_config,
            Arc::clone(&self.consensus),
            Arc::clone(&self.comm),
            Arc::clone(&self.remote),
        );

        // Run RPC server (this will block)
        if let Err(e) = rpc_server.run().await {
            error!("RPC server error: {}", e);
        }

        heartbeat.abort();
        Ok(())
    }
}

/// Dial a static peer until it answers or accepts our connection first.
/// Messages queued meanwhile are flushed when either side connects.
async fn dial_peer(comm: Arc<CommunicationManager>, peer: PeerConfig) {
    let retries = comm.config().max_retries;

    for attempt in 1..=retries {
        if comm.is_agent_connected(&peer.agent_id).await {
            return;
        }

        match comm.connect_to_agent(&peer.agent_id, &peer.address).await {
            Ok(flushed) => {
                info!("Connected to {} at {} ({} queued flushed)", peer.agent_id, peer.address, flushed);
                return;
            }
            Err(e) => warn!(
                "Dial {} at {} failed (attempt {}/{}): {}",
                peer.agent_id, peer.address, attempt, retries, e
            ),
        }

        tokio::time::sleep(PEER_RETRY_DELAY).await;
    }

    warn!("Giving up on {}; waiting for it to connect to us", peer.agent_id);
}
