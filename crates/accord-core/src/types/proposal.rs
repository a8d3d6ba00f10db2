use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::agent::AgentId;
use crate::types::vote::{Vote, VoteBreakdown};

pub type ProposalId = String;

/// Voting rule a proposal is evaluated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusType {
    SimpleMajority,
    SuperMajority,
    Unanimous,
    Weighted,
    Delegated,
}

impl ConsensusType {
    pub const ALL: [ConsensusType; 5] = [
        ConsensusType::SimpleMajority,
        ConsensusType::SuperMajority,
        ConsensusType::Unanimous,
        ConsensusType::Weighted,
        ConsensusType::Delegated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusType::SimpleMajority => "simple_majority",
            ConsensusType::SuperMajority => "super_majority",
            ConsensusType::Unanimous => "unanimous",
            ConsensusType::Weighted => "weighted",
            ConsensusType::Delegated => "delegated",
        }
    }
}

impl fmt::Display for ConsensusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsensusType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsensusType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownConsensusType(s.to_string()))
    }
}

/// Proposal lifecycle.
///
/// `Proposed -> Voting -> {Accepted | Rejected | Expired | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    Proposed,
    Voting,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

impl ConsensusStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsensusStatus::Accepted
                | ConsensusStatus::Rejected
                | ConsensusStatus::Expired
                | ConsensusStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusStatus::Proposed => "proposed",
            ConsensusStatus::Voting => "voting",
            ConsensusStatus::Accepted => "accepted",
            ConsensusStatus::Rejected => "rejected",
            ConsensusStatus::Expired => "expired",
            ConsensusStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsensusStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(ConsensusStatus::Proposed),
            "voting" => Ok(ConsensusStatus::Voting),
            "accepted" => Ok(ConsensusStatus::Accepted),
            "rejected" => Ok(ConsensusStatus::Rejected),
            "expired" => Ok(ConsensusStatus::Expired),
            "cancelled" => Ok(ConsensusStatus::Cancelled),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Outcome recorded when a proposal resolves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub reason: String,
    pub breakdown: VoteBreakdown,
}

/// A unit of decision submitted by one agent for others to vote on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusProposal {
    pub id: ProposalId,
    pub proposer: AgentId,
    pub consensus_type: ConsensusType,
    /// Opaque to the consensus layer
    pub payload: serde_json::Value,
    /// Milliseconds since epoch
    pub voting_deadline: u64,
    pub required_quorum: usize,
    /// At most one vote per voter, in first-cast order
    pub votes: Vec<Vote>,
    pub status: ConsensusStatus,
    pub result: Option<ConsensusResult>,
    pub created_at: u64,
    pub resolved_at: Option<u64>,
    /// Delegator -> delegatee
    #[serde(default)]
    pub delegations: BTreeMap<AgentId, AgentId>,
}

impl ConsensusProposal {
    pub fn new(
        id: ProposalId,
        proposer: AgentId,
        consensus_type: ConsensusType,
        payload: serde_json::Value,
        created_at: u64,
        voting_deadline: u64,
        required_quorum: usize,
    ) -> Self {
        ConsensusProposal {
            id,
            proposer,
            consensus_type,
            payload,
            voting_deadline,
            required_quorum,
            votes: Vec::new(),
            status: ConsensusStatus::Proposed,
            result: None,
            created_at,
            resolved_at: None,
            delegations: BTreeMap::new(),
        }
    }

    /// Record a vote. A repeated voter overwrites its previous vote in place.
    ///
    /// Returns the replaced vote, if any.
    pub fn upsert_vote(&mut self, vote: Vote) -> Option<Vote> {
        match self.votes.iter_mut().find(|v| v.voter == vote.voter) {
            Some(existing) => Some(std::mem::replace(existing, vote)),
            None => {
                self.votes.push(vote);
                None
            }
        }
    }

    /// Remove the vote cast by `voter`
    pub fn remove_vote(&mut self, voter: &str) -> Option<Vote> {
        let index = self.votes.iter().position(|v| v.voter == voter)?;
        Some(self.votes.remove(index))
    }

    pub fn vote_of(&self, voter: &str) -> Option<&Vote> {
        self.votes.iter().find(|v| v.voter == voter)
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn has_quorum_count(&self) -> bool {
        self.votes.len() >= self.required_quorum
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_terminal()
    }

    /// Still open for votes or about to be
    pub fn is_active(&self) -> bool {
        matches!(self.status, ConsensusStatus::Proposed | ConsensusStatus::Voting)
    }

    /// Agents that delegated their vote to `delegatee`
    pub fn delegators_of<'a>(&'a self, delegatee: &'a str) -> impl Iterator<Item = &'a AgentId> + 'a {
        self.delegations
            .iter()
            .filter(move |(_, to)| to.as_str() == delegatee)
            .map(|(from, _)| from)
    }

    pub fn breakdown(&self) -> VoteBreakdown {
        VoteBreakdown::from_votes(&self.votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::vote::VoteDecision;
    use serde_json::json;

    fn proposal() -> ConsensusProposal {
        ConsensusProposal::new(
            "p1".to_string(),
            "proposer".to_string(),
            ConsensusType::SimpleMajority,
            json!({ "action": "deploy" }),
            1_000,
            31_000,
            3,
        )
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let mut p = proposal();
        p.upsert_vote(Vote::new("a", VoteDecision::Approve, 1.0, 1));
        p.upsert_vote(Vote::new("b", VoteDecision::Approve, 1.0, 2));
        let replaced = p.upsert_vote(Vote::new("a", VoteDecision::Reject, 1.0, 3));

        assert_eq!(replaced.unwrap().decision, VoteDecision::Approve);
        assert_eq!(p.vote_count(), 2);
        assert_eq!(p.votes[0].voter, "a");
        assert_eq!(p.votes[0].decision, VoteDecision::Reject);
    }

    #[test]
    fn test_remove_vote() {
        let mut p = proposal();
        p.upsert_vote(Vote::new("a", VoteDecision::Approve, 1.0, 1));
        assert!(p.remove_vote("a").is_some());
        assert!(p.remove_vote("a").is_none());
        assert_eq!(p.vote_count(), 0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ConsensusStatus::Proposed.is_terminal());
        assert!(!ConsensusStatus::Voting.is_terminal());
        assert!(ConsensusStatus::Accepted.is_terminal());
        assert!(ConsensusStatus::Rejected.is_terminal());
        assert!(ConsensusStatus::Expired.is_terminal());
        assert!(ConsensusStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_consensus_type_parse() {
        for t in ConsensusType::ALL {
            assert_eq!(t.as_str().parse::<ConsensusType>().unwrap(), t);
        }
        assert!("plurality".parse::<ConsensusType>().is_err());
    }

    #[test]
    fn test_delegators_of() {
        let mut p = proposal();
        p.delegations.insert("a".to_string(), "c".to_string());
        p.delegations.insert("b".to_string(), "c".to_string());
        p.delegations.insert("d".to_string(), "e".to_string());

        let delegators: Vec<_> = p.delegators_of("c").cloned().collect();
        assert_eq!(delegators, vec!["a".to_string(), "b".to_string()]);
    }
}
