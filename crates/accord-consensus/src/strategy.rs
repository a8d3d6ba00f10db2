//! Voting strategies.
//!
//! A strategy is a pure function from a proposal's recorded votes to a
//! [`ConsensusVerdict`]. The manager decides what to do with the verdict:
//!
//! | Verdict | Effect |
//! |---------|--------|
//! | quorum + consensus | resolve `Accepted` |
//! | quorum + definitive | resolve `Rejected` |
//! | otherwise | keep voting |

use std::collections::HashMap;
use std::sync::Arc;

use accord_core::{ConsensusProposal, ConsensusType, VoteBreakdown};
use serde::Serialize;

pub const DEFAULT_SUPER_MAJORITY_THRESHOLD: f64 = 0.667;

/// Ratios are compared at three decimal places, so 2/3 meets 0.667
const RATIO_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsensusVerdict {
    pub has_quorum: bool,
    pub has_consensus: bool,
    /// No further votes can change the outcome
    pub is_definitive: bool,
    pub breakdown: VoteBreakdown,
}

pub trait VotingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, proposal: &ConsensusProposal) -> ConsensusVerdict;
}

/// Shared majority rule: approve weight must exceed reject weight
fn majority_verdict(proposal: &ConsensusProposal) -> ConsensusVerdict {
    let breakdown = proposal.breakdown();
    let has_quorum = proposal.has_quorum_count();

    ConsensusVerdict {
        has_quorum,
        has_consensus: has_quorum && breakdown.approve > breakdown.reject,
        is_definitive: has_quorum && breakdown.decisive_count > 0,
        breakdown,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleMajority;

impl VotingStrategy for SimpleMajority {
    fn name(&self) -> &'static str {
        "simple_majority"
    }

    fn evaluate(&self, proposal: &ConsensusProposal) -> ConsensusVerdict {
        majority_verdict(proposal)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SuperMajority {
    threshold: f64,
}

impl SuperMajority {
    pub fn new(threshold: f64) -> Self {
        SuperMajority {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for SuperMajority {
    fn default() -> Self {
        Self::new(DEFAULT_SUPER_MAJORITY_THRESHOLD)
    }
}

impl VotingStrategy for SuperMajority {
    fn name(&self) -> &'static str {
        "super_majority"
    }

    // Quorum with at least one decisive vote is treated as definitive. A
    // tighter bound would need the number of eligible voters still outstanding.
    fn evaluate(&self, proposal: &ConsensusProposal) -> ConsensusVerdict {
        let breakdown = proposal.breakdown();
        let has_quorum = proposal.has_quorum_count();
        let meets_threshold = breakdown.decisive_weight() > 0.0
            && breakdown.approval_ratio() + RATIO_TOLERANCE >= self.threshold;

        ConsensusVerdict {
            has_quorum,
            has_consensus: has_quorum && meets_threshold,
            is_definitive: has_quorum && breakdown.decisive_count > 0,
            breakdown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unanimous;

impl VotingStrategy for Unanimous {
    fn name(&self) -> &'static str {
        "unanimous"
    }

    fn evaluate(&self, proposal: &ConsensusProposal) -> ConsensusVerdict {
        let breakdown = proposal.breakdown();
        let has_quorum = proposal.has_quorum_count();

        ConsensusVerdict {
            has_quorum,
            has_consensus: has_quorum && breakdown.reject == 0.0 && breakdown.approve > 0.0,
            is_definitive: has_quorum && breakdown.decisive_count > 0,
            breakdown,
        }
    }
}

/// Majority rule over agent-supplied weights
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedStrategy;

impl VotingStrategy for WeightedStrategy {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn evaluate(&self, proposal: &ConsensusProposal) -> ConsensusVerdict {
        majority_verdict(proposal)
    }
}

/// Weighted majority where delegated weight was folded in at cast time
#[derive(Debug, Clone, Copy, Default)]
pub struct DelegatedStrategy;

impl VotingStrategy for DelegatedStrategy {
    fn name(&self) -> &'static str {
        "delegated"
    }

    fn evaluate(&self, proposal: &ConsensusProposal) -> ConsensusVerdict {
        majority_verdict(proposal)
    }
}

/// Strategy table with one entry per consensus type
pub fn default_strategies(super_majority_threshold: f64) -> HashMap<ConsensusType, Arc<dyn VotingStrategy>> {
    let mut strategies: HashMap<ConsensusType, Arc<dyn VotingStrategy>> = HashMap::new();
    strategies.insert(ConsensusType::SimpleMajority, Arc::new(SimpleMajority));
    strategies.insert(
        ConsensusType::SuperMajority,
        Arc::new(SuperMajority::new(super_majority_threshold)),
    );
    strategies.insert(ConsensusType::Unanimous, Arc::new(Unanimous));
    strategies.insert(ConsensusType::Weighted, Arc::new(WeightedStrategy));
    strategies.insert(ConsensusType::Delegated, Arc::new(DelegatedStrategy));
    strategies
}
