use std::collections::BTreeMap;

use accord_core::{ConsensusStatus, ConsensusType};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TypeMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Aggregate consensus statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsensusMetrics {
    pub total_proposals: u64,
    pub successful_proposals: u64,
    pub failed_proposals: u64,
    pub by_type: BTreeMap<ConsensusType, TypeMetrics>,
    /// Mean time from creation to an accept/reject decision
    pub average_consensus_time_ms: f64,
    /// Number of decisions folded into the mean
    pub decided_proposals: u64,
    pub total_votes_cast: u64,
    /// Votes on active proposals / (active agents x active proposals)
    pub participation_rate: f64,
}

impl ConsensusMetrics {
    pub fn record_created(&mut self, consensus_type: ConsensusType) {
        self.total_proposals += 1;
        self.by_type.entry(consensus_type).or_default().total += 1;
    }

    pub fn record_vote(&mut self) {
        self.total_votes_cast += 1;
    }

    pub fn record_resolution(&mut self, consensus_type: ConsensusType, status: ConsensusStatus, elapsed_ms: u64) {
        let type_metrics = self.by_type.entry(consensus_type).or_default();
        match status {
            ConsensusStatus::Accepted => {
                self.successful_proposals += 1;
                type_metrics.successful += 1;
            }
            ConsensusStatus::Rejected | ConsensusStatus::Expired | ConsensusStatus::Cancelled => {
                self.failed_proposals += 1;
                type_metrics.failed += 1;
            }
            ConsensusStatus::Proposed | ConsensusStatus::Voting => return,
        }

        if matches!(status, ConsensusStatus::Accepted | ConsensusStatus::Rejected) {
            self.decided_proposals += 1;
            let n = self.decided_proposals as f64;
            self.average_consensus_time_ms += (elapsed_ms as f64 - self.average_consensus_time_ms) / n;
        }
    }
}

/// Votes on active proposals divided by every agent-proposal pairing
pub fn participation_rate(active_votes: usize, active_agents: usize, active_proposals: usize) -> f64 {
    let slots = active_agents * active_proposals;
    if slots == 0 {
        return 0.0;
    }
    active_votes as f64 / slots as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_mean() {
        let mut metrics = ConsensusMetrics::default();
        metrics.record_resolution(ConsensusType::SimpleMajority, ConsensusStatus::Accepted, 100);
        metrics.record_resolution(ConsensusType::SimpleMajority, ConsensusStatus::Rejected, 300);
        metrics.record_resolution(ConsensusType::Unanimous, ConsensusStatus::Accepted, 200);

        assert!((metrics.average_consensus_time_ms - 200.0).abs() < 1e-9);
        assert_eq!(metrics.decided_proposals, 3);
    }

    #[test]
    fn test_expired_not_in_mean() {
        let mut metrics = ConsensusMetrics::default();
        metrics.record_resolution(ConsensusType::Weighted, ConsensusStatus::Accepted, 100);
        metrics.record_resolution(ConsensusType::Weighted, ConsensusStatus::Expired, 10_000);

        assert_eq!(metrics.average_consensus_time_ms, 100.0);
        assert_eq!(metrics.failed_proposals, 1);
        assert_eq!(metrics.by_type[&ConsensusType::Weighted].failed, 1);
        assert_eq!(metrics.by_type[&ConsensusType::Weighted].successful, 1);
    }

    #[test]
    fn test_participation_rate() {
        assert_eq!(participation_rate(3, 0, 2), 0.0);
        assert_eq!(participation_rate(0, 4, 0), 0.0);
        assert!((participation_rate(3, 4, 2) - 0.375).abs() < 1e-9);
    }
}
