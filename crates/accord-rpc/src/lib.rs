//! Accord RPC - HTTP and WebSocket API
//!
//! Exposes the consensus and communication managers of one agent over
//! HTTP, and streams their events to WebSocket clients.

pub mod error;
pub mod http;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use accord_comm::CommunicationManager;
use accord_consensus::{ConsensusManager, RemoteProposals};
use axum::Router;
use tracing::info;

use http::{create_router, AppState};
use ws::create_ws_router;

pub use error::RpcError;
pub use http::handlers::{MetricsResponse, StatusResponse, VoteResponse};
pub use ws::WsEvent;

/// RPC server configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP bind address
    pub http_addr: SocketAddr,
    /// Enable WebSocket
    pub enable_ws: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_ws: true,
        }
    }
}

/// RPC server
pub struct RpcServer {
    config: RpcConfig,
    app_state: Arc<AppState>,
}

impl RpcServer {
    pub fn new(
        config: RpcConfig,
        consensus: Arc<ConsensusManager>,
        comm: Arc<CommunicationManager>,
        remote: Arc<RemoteProposals>,
    ) -> Self {
        let app_state = Arc::new(AppState::new(consensus, comm, remote));
        RpcServer { config, app_state }
    }

    /// Create the combined router
    pub fn router(&self) -> Router {
        let http_router = create_router(Arc::clone(&self.app_state));

        if self.config.enable_ws {
            let ws_router = create_ws_router(
                Arc::clone(&self.app_state.consensus),
                Arc::clone(&self.app_state.comm),
            );
            http_router.merge(ws_router)
        } else {
            http_router
        }
    }

    /// Run the RPC server
    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = self.config.http_addr;

        info!("Starting RPC server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    }
}
