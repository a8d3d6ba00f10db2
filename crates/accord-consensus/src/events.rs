use accord_core::{ConsensusProposal, ConsensusStatus, ProposalId, Vote, VoteBreakdown};
use serde::Serialize;

use crate::error::ConsensusError;

/// Notifications published by the consensus manager
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ConsensusEvent {
    ProposalCreated {
        proposal: ConsensusProposal,
    },
    ProposalUpdated {
        proposal: ConsensusProposal,
    },
    ProposalResolved {
        proposal: ConsensusProposal,
    },
    VoteCast {
        proposal_id: ProposalId,
        vote: Vote,
    },
    QuorumReached {
        proposal_id: ProposalId,
        vote_count: usize,
        required_quorum: usize,
    },
    ConsensusReached {
        proposal_id: ProposalId,
        status: ConsensusStatus,
        breakdown: VoteBreakdown,
    },
    ConsensusFailed {
        proposal_id: ProposalId,
        status: ConsensusStatus,
        reason: String,
    },
    TimeoutExpired {
        proposal_id: ProposalId,
        vote_count: usize,
    },
}

impl ConsensusEvent {
    pub fn proposal_id(&self) -> &str {
        match self {
            ConsensusEvent::ProposalCreated { proposal }
            | ConsensusEvent::ProposalUpdated { proposal }
            | ConsensusEvent::ProposalResolved { proposal } => &proposal.id,
            ConsensusEvent::VoteCast { proposal_id, .. }
            | ConsensusEvent::QuorumReached { proposal_id, .. }
            | ConsensusEvent::ConsensusReached { proposal_id, .. }
            | ConsensusEvent::ConsensusFailed { proposal_id, .. }
            | ConsensusEvent::TimeoutExpired { proposal_id, .. } => proposal_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConsensusEvent::ProposalCreated { .. } => "proposal_created",
            ConsensusEvent::ProposalUpdated { .. } => "proposal_updated",
            ConsensusEvent::ProposalResolved { .. } => "proposal_resolved",
            ConsensusEvent::VoteCast { .. } => "vote_cast",
            ConsensusEvent::QuorumReached { .. } => "quorum_reached",
            ConsensusEvent::ConsensusReached { .. } => "consensus_reached",
            ConsensusEvent::ConsensusFailed { .. } => "consensus_failed",
            ConsensusEvent::TimeoutExpired { .. } => "timeout_expired",
        }
    }
}

/// Ships new proposals and resolutions to peer agents.
///
/// Called with the proposal table locked, so implementations must not block;
/// hand the work to a channel or task instead.
pub trait ProposalNotifier: Send + Sync {
    fn proposal_created(&self, proposal: &ConsensusProposal) -> Result<(), ConsensusError>;

    fn proposal_resolved(&self, _proposal: &ConsensusProposal) {}
}
