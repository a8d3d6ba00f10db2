use accord_core::{ConsensusStatus, ConsensusType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("Proposal {id} is not open for voting (status: {status})")]
    NotVoting { id: String, status: ConsensusStatus },

    #[error("Voting deadline passed for proposal {0}")]
    VotingClosed(String),

    #[error("Proposal {id} already resolved as {status}")]
    AlreadyResolved { id: String, status: ConsensusStatus },

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Agent {agent} may not {action}")]
    Unauthorized { agent: String, action: String },

    #[error("No strategy registered for {0}")]
    UnknownStrategy(ConsensusType),

    #[error("Failed to notify peers: {0}")]
    Notify(String),

    #[error("Core error: {0}")]
    Core(#[from] accord_core::CoreError),
}
