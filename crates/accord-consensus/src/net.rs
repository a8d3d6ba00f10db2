use accord_core::{AgentId, ConsensusProposal, ConsensusResult, ConsensusStatus, ProposalId, VoteDecision};
use serde::{Deserialize, Serialize};

/// Message type carrying a [`ProposalNotice`]
pub const PROPOSAL_MESSAGE: &str = "consensus.proposal";
/// Message type carrying a [`VoteRequest`]
pub const VOTE_MESSAGE: &str = "consensus.vote";
/// Message type carrying a [`ResolutionNotice`]
pub const RESOLUTION_MESSAGE: &str = "consensus.resolved";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalNotice {
    pub proposal: ConsensusProposal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub proposal_id: ProposalId,
    pub voter: AgentId,
    pub decision: VoteDecision,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionNotice {
    pub proposal_id: ProposalId,
    pub status: ConsensusStatus,
    pub result: Option<ConsensusResult>,
}

impl From<&ConsensusProposal> for ResolutionNotice {
    fn from(proposal: &ConsensusProposal) -> Self {
        ResolutionNotice {
            proposal_id: proposal.id.clone(),
            status: proposal.status,
            result: proposal.result.clone(),
        }
    }
}
