use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use accord_comm::{
    CommError, CommMetrics, CommunicationManager, ConnectionStatus, DeliveryReport, RetryOutcome,
    SendOptions,
};
use accord_consensus::{
    ConsensusError, ConsensusManager, ConsensusMetrics, ProposalOptions, RemoteProposals,
    VoteRequest, VOTE_MESSAGE,
};
use accord_core::{
    now_millis, AgentId, AgentStatus, ConsensusProposal, ConsensusStatus, ConsensusType, Message,
    MessageId, MessagePriority, ProposalId, Recipient, VoteDecision,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::RpcError;

/// Application state shared with handlers
pub struct AppState {
    pub agent_id: AgentId,
    pub consensus: Arc<ConsensusManager>,
    pub comm: Arc<CommunicationManager>,
    pub remote: Arc<RemoteProposals>,
    pub started_at: u64,
}

impl AppState {
    pub fn new(
        consensus: Arc<ConsensusManager>,
        comm: Arc<CommunicationManager>,
        remote: Arc<RemoteProposals>,
    ) -> Self {
        AppState {
            agent_id: comm.agent_id().to_string(),
            consensus,
            comm,
            remote,
            started_at: now_millis(),
        }
    }
}

// Response types

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub agent_id: AgentId,
    pub uptime_ms: u64,
    pub connected_agents: Vec<AgentId>,
    pub active_proposals: usize,
    pub remote_proposals: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProposalResponse {
    pub id: ProposalId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteResponse {
    pub proposal_id: ProposalId,
    /// Sent to the proposer's agent instead of being cast here
    pub forwarded: bool,
    pub status: Option<ConsensusStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProposalStatusResponse {
    pub proposal_id: ProposalId,
    pub status: ConsensusStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeadlineResponse {
    pub proposal_id: ProposalId,
    pub voting_deadline: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_id: AgentId,
    pub status: AgentStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveAgentResponse {
    pub agent_id: AgentId,
    pub votes_removed: usize,
    pub queue_dropped: bool,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub consensus: ConsensusMetrics,
    pub communication: CommMetrics,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub message_id: MessageId,
    pub outcome: RetryOutcome,
}

// Request types

#[derive(Debug, Deserialize)]
pub struct CreateProposalRequest {
    /// Defaults to this node's agent
    pub proposer: Option<AgentId>,
    pub consensus_type: ConsensusType,
    #[serde(default)]
    pub payload: Value,
    pub timeout_ms: Option<u64>,
    pub required_quorum: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ProposalQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub consensus_type: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub voter: AgentId,
    pub decision: VoteDecision,
    pub reasoning: Option<String>,
    pub weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub requester: AgentId,
}

#[derive(Debug, Deserialize)]
pub struct DelegateRequest {
    pub delegator: AgentId,
    pub delegatee: AgentId,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub additional_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct AgentStatusRequest {
    pub status: AgentStatus,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: Recipient,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

// Handlers

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let connected_agents = state.comm.get_connected_agents().await;
    let active_proposals = state.consensus.get_active_proposals().await.len();
    let remote_proposals = state.remote.list().await.len();

    Json(StatusResponse {
        agent_id: state.agent_id.clone(),
        uptime_ms: now_millis().saturating_sub(state.started_at),
        connected_agents,
        active_proposals,
        remote_proposals,
    })
}

pub async fn create_proposal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProposalRequest>,
) -> Result<(StatusCode, Json<CreateProposalResponse>), RpcError> {
    let proposer = req.proposer.unwrap_or_else(|| state.agent_id.clone());
    let options = ProposalOptions {
        timeout: req.timeout_ms.map(Duration::from_millis),
        required_quorum: req.required_quorum,
    };

    let id = state
        .consensus
        .create_proposal(proposer, req.consensus_type, req.payload, options)
        .await?;

    Ok((StatusCode::CREATED, Json(CreateProposalResponse { id })))
}

pub async fn list_proposals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProposalQuery>,
) -> Result<Json<Vec<ConsensusProposal>>, RpcError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ConsensusStatus>)
        .transpose()
        .map_err(|e| RpcError::BadRequest(e.to_string()))?;
    let consensus_type = query
        .consensus_type
        .as_deref()
        .map(str::parse::<ConsensusType>)
        .transpose()
        .map_err(|e| RpcError::BadRequest(e.to_string()))?;

    let proposals = if query.active.unwrap_or(false) {
        state.consensus.get_active_proposals().await
    } else {
        state.consensus.get_all_proposals().await
    };

    let filtered = proposals
        .into_iter()
        .filter(|p| status.map_or(true, |s| p.status == s))
        .filter(|p| consensus_type.map_or(true, |t| p.consensus_type == t))
        .collect();

    Ok(Json(filtered))
}

pub async fn get_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConsensusProposal>, RpcError> {
    if let Some(proposal) = state.consensus.get_proposal(&id).await {
        return Ok(Json(proposal));
    }

    state
        .remote
        .get(&id)
        .await
        .map(Json)
        .ok_or(RpcError::Consensus(ConsensusError::ProposalNotFound(id)))
}

/// Cast a vote on a local proposal, or forward it to the proposer of a
/// remote one
pub async fn cast_vote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CastVoteRequest>,
) -> Result<Json<VoteResponse>, RpcError> {
    if state.consensus.get_proposal(&id).await.is_some() {
        let status = state
            .consensus
            .cast_vote(&id, req.voter, req.decision, req.reasoning, req.weight)
            .await?;

        return Ok(Json(VoteResponse {
            proposal_id: id,
            forwarded: false,
            status: Some(status),
        }));
    }

    let proposer = state
        .remote
        .proposer_of(&id)
        .await
        .ok_or_else(|| ConsensusError::ProposalNotFound(id.clone()))?;

    let vote = VoteRequest {
        proposal_id: id.clone(),
        voter: req.voter,
        decision: req.decision,
        reasoning: req.reasoning,
        weight: req.weight,
    };
    let payload = serde_json::to_value(&vote).map_err(|e| RpcError::Internal(e.to_string()))?;

    state
        .comm
        .send_message(
            Recipient::one(proposer.clone()),
            VOTE_MESSAGE,
            payload,
            SendOptions::default().with_priority(MessagePriority::High),
        )
        .await?;
    info!("Forwarded vote on {} to {}", id, proposer);

    Ok(Json(VoteResponse {
        proposal_id: id,
        forwarded: true,
        status: None,
    }))
}

pub async fn withdraw_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<WithdrawRequest>,
) -> Result<Json<ProposalStatusResponse>, RpcError> {
    state.consensus.withdraw_proposal(&id, &req.requester).await?;

    Ok(Json(ProposalStatusResponse {
        proposal_id: id,
        status: ConsensusStatus::Cancelled,
    }))
}

pub async fn delegate_vote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<DelegateRequest>,
) -> Result<StatusCode, RpcError> {
    state
        .consensus
        .delegate_vote(&id, &req.delegator, &req.delegatee)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn extend_deadline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<DeadlineResponse>, RpcError> {
    let voting_deadline = state
        .consensus
        .extend_voting_deadline(&id, Duration::from_millis(req.additional_ms))
        .await?;

    Ok(Json(DeadlineResponse {
        proposal_id: id,
        voting_deadline,
    }))
}

pub async fn update_agent_status(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(req): Json<AgentStatusRequest>,
) -> Json<AgentResponse> {
    state
        .consensus
        .update_agent_status(agent_id.clone(), req.status)
        .await;

    Json(AgentResponse {
        agent_id,
        status: req.status,
    })
}

/// Forget an agent in both managers, discarding its votes and its queue
pub async fn remove_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<RemoveAgentResponse>, RpcError> {
    let votes_removed = state.consensus.remove_agent(&agent_id).await;

    let queue_dropped = match state.comm.disconnect_from_agent(&agent_id).await {
        Ok(()) => true,
        Err(CommError::AgentNotFound(_)) => false,
        Err(e) => return Err(e.into()),
    };

    Ok(Json(RemoveAgentResponse {
        agent_id,
        votes_removed,
        queue_dropped,
    }))
}

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        consensus: state.consensus.get_metrics().await,
        communication: state.comm.get_metrics().await,
    })
}

pub async fn get_connections(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionStatus>> {
    Json(state.comm.get_all_connection_status().await)
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<DeliveryReport>, RpcError> {
    let mut message = Message::new(state.agent_id.clone(), req.to, req.message_type, req.payload)
        .with_priority(req.priority)
        .with_encrypted(req.encrypted);
    message.metadata = req.metadata;

    let report = state.comm.dispatch(message).await?;
    Ok(Json(report))
}

pub async fn retry_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, RpcError> {
    let outcome = state.comm.retry_failed_message(&id).await?;

    Ok(Json(RetryResponse {
        message_id: id,
        outcome,
    }))
}
