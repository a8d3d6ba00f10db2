//! Accord Consensus - Proposal lifecycle and voting
//!
//! This crate provides the consensus state machine: proposal storage,
//! deadline timers, vote bookkeeping and pluggable voting strategies.

pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod net;
pub mod remote;
pub mod strategy;
pub mod timer;
pub mod weight;

pub use error::ConsensusError;
pub use events::{ConsensusEvent, ProposalNotifier};
pub use manager::{ConsensusConfig, ConsensusManager, ProposalOptions};
pub use metrics::{ConsensusMetrics, TypeMetrics};
pub use net::{ProposalNotice, ResolutionNotice, VoteRequest, PROPOSAL_MESSAGE, RESOLUTION_MESSAGE, VOTE_MESSAGE};
pub use remote::RemoteProposals;
pub use strategy::{
    default_strategies, ConsensusVerdict, DelegatedStrategy, SimpleMajority, SuperMajority,
    Unanimous, VotingStrategy, WeightedStrategy, DEFAULT_SUPER_MAJORITY_THRESHOLD,
};
pub use timer::DeadlineTimer;
pub use weight::{LivenessWeight, WeightPolicy};
