use accord_comm::CommError;
use accord_consensus::ConsensusError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Communication error: {0}")]
    Comm(#[from] CommError),

    #[error("Core error: {0}")]
    Core(#[from] accord_core::CoreError),
}

impl RpcError {
    fn status(&self) -> StatusCode {
        match self {
            RpcError::NotFound(_) => StatusCode::NOT_FOUND,
            RpcError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RpcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RpcError::Consensus(e) => match e {
                ConsensusError::ProposalNotFound(_) => StatusCode::NOT_FOUND,
                ConsensusError::NotVoting { .. }
                | ConsensusError::VotingClosed(_)
                | ConsensusError::AlreadyResolved { .. } => StatusCode::CONFLICT,
                ConsensusError::InvalidVote(_)
                | ConsensusError::InvalidProposal(_)
                | ConsensusError::UnknownStrategy(_) => StatusCode::BAD_REQUEST,
                ConsensusError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                ConsensusError::Notify(_) | ConsensusError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            RpcError::Comm(e) => match e {
                CommError::AgentNotFound(_) | CommError::MessageNotFound(_) => StatusCode::NOT_FOUND,
                CommError::InvalidMessage(_)
                | CommError::RouteNotFound(_)
                | CommError::RoutingDepthExceeded(_) => StatusCode::BAD_REQUEST,
                CommError::HandshakeTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            RpcError::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}
