use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::agent::AgentId;

/// Vote direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Approve,
    Reject,
    Abstain,
}

impl VoteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDecision::Approve => "approve",
            VoteDecision::Reject => "reject",
            VoteDecision::Abstain => "abstain",
        }
    }
}

impl fmt::Display for VoteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteDecision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(VoteDecision::Approve),
            "reject" => Ok(VoteDecision::Reject),
            "abstain" => Ok(VoteDecision::Abstain),
            other => Err(CoreError::UnknownDecision(other.to_string())),
        }
    }
}

/// A single vote on a proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: AgentId,
    pub decision: VoteDecision,
    /// Non-negative multiplier
    pub weight: f64,
    pub reasoning: Option<String>,
    /// Milliseconds since epoch
    pub timestamp: u64,
}

impl Vote {
    pub fn new(voter: impl Into<AgentId>, decision: VoteDecision, weight: f64, timestamp: u64) -> Self {
        Vote {
            voter: voter.into(),
            decision,
            weight,
            reasoning: None,
            timestamp,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Votes reduced to weight sums per decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteBreakdown {
    pub approve: f64,
    pub reject: f64,
    pub abstain: f64,
    /// Number of recorded votes, abstentions included
    pub vote_count: usize,
    /// Number of approve/reject votes
    pub decisive_count: usize,
}

impl VoteBreakdown {
    pub fn from_votes(votes: &[Vote]) -> Self {
        let mut breakdown = VoteBreakdown::default();
        for vote in votes {
            match vote.decision {
                VoteDecision::Approve => {
                    breakdown.approve += vote.weight;
                    breakdown.decisive_count += 1;
                }
                VoteDecision::Reject => {
                    breakdown.reject += vote.weight;
                    breakdown.decisive_count += 1;
                }
                VoteDecision::Abstain => breakdown.abstain += vote.weight,
            }
            breakdown.vote_count += 1;
        }
        breakdown
    }

    /// Weight of approve and reject votes
    pub fn decisive_weight(&self) -> f64 {
        self.approve + self.reject
    }

    /// Approve share of the decisive weight, 0 when nothing decisive was cast
    pub fn approval_ratio(&self) -> f64 {
        let decisive = self.decisive_weight();
        if decisive > 0.0 {
            self.approve / decisive
        } else {
            0.0
        }
    }
}
