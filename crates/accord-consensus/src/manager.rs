use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use accord_core::{
    generate_id, now_millis, AgentId, AgentStatus, ConsensusProposal, ConsensusResult,
    ConsensusStatus, ConsensusType, EventBroadcaster, ProposalId, Vote, VoteBreakdown,
    VoteDecision,
};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::ConsensusError;
use crate::events::{ConsensusEvent, ProposalNotifier};
use crate::metrics::{participation_rate, ConsensusMetrics};
use crate::strategy::{default_strategies, ConsensusVerdict, VotingStrategy, DEFAULT_SUPER_MAJORITY_THRESHOLD};
use crate::timer::DeadlineTimer;
use crate::weight::{LivenessWeight, WeightPolicy};

/// Configuration for the consensus manager
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Voting window used when a proposal does not set one
    pub default_timeout: Duration,
    /// Quorum used when a proposal does not set one
    pub default_quorum: usize,
    /// Approval ratio required by the super-majority strategy
    pub super_majority_threshold: f64,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            default_timeout: Duration::from_secs(30),
            default_quorum: 3,
            super_majority_threshold: DEFAULT_SUPER_MAJORITY_THRESHOLD,
            event_capacity: 1024,
        }
    }
}

/// Per-proposal overrides
#[derive(Debug, Clone, Default)]
pub struct ProposalOptions {
    pub timeout: Option<Duration>,
    pub required_quorum: Option<usize>,
}

impl ProposalOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_quorum(mut self, required_quorum: usize) -> Self {
        self.required_quorum = Some(required_quorum);
        self
    }
}

struct ProposalEntry {
    proposal: ConsensusProposal,
    timer: Option<DeadlineTimer>,
    quorum_announced: bool,
}

/// What to do with the deadline timer on resolution
enum TimerDisposition {
    Cancel,
    /// The timer itself is resolving the proposal
    Detach,
}

struct Resolution {
    consensus_type: ConsensusType,
    status: ConsensusStatus,
    elapsed_ms: u64,
}

/// Owns proposals, their deadline timers and vote bookkeeping.
///
/// Lock order is agents, then proposals, then metrics.
pub struct ConsensusManager {
    config: ConsensusConfig,
    proposals: RwLock<HashMap<ProposalId, ProposalEntry>>,
    agents: RwLock<HashMap<AgentId, AgentStatus>>,
    strategies: HashMap<ConsensusType, Arc<dyn VotingStrategy>>,
    weight_policy: Arc<dyn WeightPolicy>,
    notifier: Option<Arc<dyn ProposalNotifier>>,
    metrics: RwLock<ConsensusMetrics>,
    events: EventBroadcaster<ConsensusEvent>,
}

impl ConsensusManager {
    pub fn new(config: ConsensusConfig) -> Self {
        let strategies = default_strategies(config.super_majority_threshold);
        let events = EventBroadcaster::new(config.event_capacity);

        ConsensusManager {
            config,
            proposals: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            strategies,
            weight_policy: Arc::new(LivenessWeight::new()),
            notifier: None,
            metrics: RwLock::new(ConsensusMetrics::default()),
            events,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ProposalNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_weight_policy(mut self, policy: Arc<dyn WeightPolicy>) -> Self {
        self.weight_policy = policy;
        self
    }

    /// Replace the strategy used for one consensus type
    pub fn with_strategy(mut self, consensus_type: ConsensusType, strategy: Arc<dyn VotingStrategy>) -> Self {
        self.strategies.insert(consensus_type, strategy);
        self
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.events.subscribe()
    }

    /// Create a proposal and open it for voting
    pub async fn create_proposal(
        self: &Arc<Self>,
        proposer: impl Into<AgentId>,
        consensus_type: ConsensusType,
        payload: Value,
        options: ProposalOptions,
    ) -> Result<ProposalId, ConsensusError> {
        let proposer = proposer.into();
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let required_quorum = options.required_quorum.unwrap_or(self.config.default_quorum);

        if proposer.is_empty() {
            return Err(ConsensusError::InvalidProposal("proposer id must not be empty".to_string()));
        }
        if required_quorum == 0 {
            return Err(ConsensusError::InvalidProposal("required quorum must be at least 1".to_string()));
        }
        if timeout.is_zero() {
            return Err(ConsensusError::InvalidProposal("voting timeout must be positive".to_string()));
        }
        if !self.strategies.contains_key(&consensus_type) {
            return Err(ConsensusError::UnknownStrategy(consensus_type));
        }

        let now = now_millis();
        let voting_deadline = deadline_after(now, timeout)?;
        let id = generate_id("proposal");
        let created = ConsensusProposal::new(
            id.clone(),
            proposer,
            consensus_type,
            payload,
            now,
            voting_deadline,
            required_quorum,
        );

        let mut proposals = self.proposals.write().await;
        let timer = self.schedule_deadline(id.clone(), timeout);
        proposals.insert(
            id.clone(),
            ProposalEntry {
                proposal: created.clone(),
                timer: Some(timer),
                quorum_announced: false,
            },
        );

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.proposal_created(&created) {
                warn!("Dropping proposal {}: {}", id, e);
                proposals.remove(&id);
                return Err(e);
            }
        }

        let updated = proposals.get_mut(&id).map(|entry| {
            entry.proposal.status = ConsensusStatus::Voting;
            entry.proposal.clone()
        });

        info!(
            "Proposal {} created by {} ({}, quorum {}, timeout {}ms)",
            id,
            created.proposer,
            consensus_type,
            required_quorum,
            timeout.as_millis()
        );

        // emitted under the proposal lock so no vote event can precede them
        self.events.emit(ConsensusEvent::ProposalCreated { proposal: created });
        if let Some(proposal) = updated {
            self.events.emit(ConsensusEvent::ProposalUpdated { proposal });
        }

        self.metrics.write().await.record_created(consensus_type);
        drop(proposals);

        Ok(id)
    }

    /// Record a vote and re-evaluate the proposal.
    ///
    /// Returns the proposal status after evaluation.
    pub async fn cast_vote(
        &self,
        proposal_id: &str,
        voter: impl Into<AgentId>,
        decision: VoteDecision,
        reasoning: Option<String>,
        weight: Option<f64>,
    ) -> Result<ConsensusStatus, ConsensusError> {
        let voter = voter.into();
        if voter.is_empty() {
            return Err(ConsensusError::InvalidVote("voter id must not be empty".to_string()));
        }
        if let Some(w) = weight {
            if !w.is_finite() || w < 0.0 {
                return Err(ConsensusError::InvalidVote(format!(
                    "weight must be a non-negative number, got {}",
                    w
                )));
            }
        }

        let agents = self.agents.read().await;
        let mut proposals = self.proposals.write().await;
        let entry = proposals
            .get_mut(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;

        let proposal = &mut entry.proposal;
        if proposal.status != ConsensusStatus::Voting {
            return Err(ConsensusError::NotVoting {
                id: proposal.id.clone(),
                status: proposal.status,
            });
        }

        let now = now_millis();
        if now >= proposal.voting_deadline {
            return Err(ConsensusError::VotingClosed(proposal.id.clone()));
        }

        if let Some(delegatee) = proposal.delegations.get(&voter) {
            return Err(ConsensusError::InvalidVote(format!(
                "{} delegated its vote to {}",
                voter, delegatee
            )));
        }

        let weight = match weight {
            Some(w) => w,
            None => self.default_weight(proposal, &voter, &agents),
        };
        drop(agents);

        let mut vote = Vote::new(voter, decision, weight, now);
        vote.reasoning = reasoning;

        if proposal.upsert_vote(vote.clone()).is_some() {
            debug!("Vote from {} on {} replaced", vote.voter, proposal.id);
        }

        debug!(
            "Vote cast on {} by {}: {} (weight {})",
            proposal.id, vote.voter, vote.decision, vote.weight
        );

        self.events.emit(ConsensusEvent::VoteCast {
            proposal_id: proposal.id.clone(),
            vote,
        });

        let resolution = self.evaluate_entry(entry, now);
        let status = entry.proposal.status;

        let mut metrics = self.metrics.write().await;
        metrics.record_vote();
        if let Some(resolution) = resolution {
            metrics.record_resolution(resolution.consensus_type, resolution.status, resolution.elapsed_ms);
        }

        Ok(status)
    }

    /// Re-run the strategy for a proposal without casting a vote
    pub async fn recheck(&self, proposal_id: &str) -> Result<ConsensusStatus, ConsensusError> {
        let mut proposals = self.proposals.write().await;
        let entry = proposals
            .get_mut(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;

        if entry.proposal.status != ConsensusStatus::Voting {
            return Ok(entry.proposal.status);
        }

        let resolution = self.evaluate_entry(entry, now_millis());
        let status = entry.proposal.status;
        if let Some(resolution) = resolution {
            self.record_resolution(resolution).await;
        }

        Ok(status)
    }

    /// Evaluate a proposal for a consensus verdict without changing it
    pub async fn evaluate(&self, proposal_id: &str) -> Result<ConsensusVerdict, ConsensusError> {
        let proposals = self.proposals.read().await;
        let entry = proposals
            .get(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;
        let strategy = self
            .strategies
            .get(&entry.proposal.consensus_type)
            .ok_or(ConsensusError::UnknownStrategy(entry.proposal.consensus_type))?;

        Ok(strategy.evaluate(&entry.proposal))
    }

    /// Cancel a proposal that has not resolved yet. Only its proposer may.
    pub async fn withdraw_proposal(&self, proposal_id: &str, requester: &str) -> Result<(), ConsensusError> {
        let mut proposals = self.proposals.write().await;
        let entry = proposals
            .get_mut(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;

        if entry.proposal.is_resolved() {
            return Err(ConsensusError::AlreadyResolved {
                id: entry.proposal.id.clone(),
                status: entry.proposal.status,
            });
        }
        if entry.proposal.proposer != requester {
            return Err(ConsensusError::Unauthorized {
                agent: requester.to_string(),
                action: format!("withdraw proposal {}", proposal_id),
            });
        }

        let breakdown = entry.proposal.breakdown();
        let resolution = self.resolve(
            entry,
            ConsensusStatus::Cancelled,
            format!("withdrawn by {}", requester),
            breakdown,
            now_millis(),
            TimerDisposition::Cancel,
        );
        self.record_resolution(resolution).await;

        Ok(())
    }

    /// Hand `delegator`'s vote on a proposal to `delegatee`.
    ///
    /// Any vote the delegator already cast is removed; the delegatee votes in
    /// its place. No vote is cast here.
    pub async fn delegate_vote(&self, proposal_id: &str, delegator: &str, delegatee: &str) -> Result<(), ConsensusError> {
        if delegator == delegatee {
            return Err(ConsensusError::InvalidVote(format!("{} cannot delegate to itself", delegator)));
        }

        let mut proposals = self.proposals.write().await;
        let entry = proposals
            .get_mut(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;
        let proposal = &mut entry.proposal;

        if proposal.status != ConsensusStatus::Voting {
            return Err(ConsensusError::NotVoting {
                id: proposal.id.clone(),
                status: proposal.status,
            });
        }
        if now_millis() >= proposal.voting_deadline {
            return Err(ConsensusError::VotingClosed(proposal.id.clone()));
        }
        if proposal.delegations.contains_key(delegatee) {
            return Err(ConsensusError::InvalidVote(format!(
                "{} has delegated its own vote",
                delegatee
            )));
        }
        if proposal.delegators_of(delegator).next().is_some() {
            return Err(ConsensusError::InvalidVote(format!(
                "{} holds delegated votes and cannot delegate",
                delegator
            )));
        }

        if proposal.remove_vote(delegator).is_some() {
            debug!("Removed vote of {} on {} before delegation", delegator, proposal.id);
        }
        proposal
            .delegations
            .insert(delegator.to_string(), delegatee.to_string());

        info!("{} delegated its vote on {} to {}", delegator, proposal.id, delegatee);

        let snapshot = proposal.clone();
        drop(proposals);
        self.events.emit(ConsensusEvent::ProposalUpdated { proposal: snapshot });

        Ok(())
    }

    /// Push the voting deadline back and reschedule the timer.
    ///
    /// Returns the new deadline.
    pub async fn extend_voting_deadline(
        self: &Arc<Self>,
        proposal_id: &str,
        additional: Duration,
    ) -> Result<u64, ConsensusError> {
        if additional.is_zero() {
            return Err(ConsensusError::InvalidProposal("extension must be positive".to_string()));
        }

        let mut proposals = self.proposals.write().await;
        let entry = proposals
            .get_mut(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;

        if entry.proposal.status != ConsensusStatus::Voting {
            return Err(ConsensusError::NotVoting {
                id: entry.proposal.id.clone(),
                status: entry.proposal.status,
            });
        }

        entry.proposal.voting_deadline = deadline_after(entry.proposal.voting_deadline, additional)?;
        let remaining = entry.proposal.voting_deadline.saturating_sub(now_millis());

        if let Some(timer) = entry.timer.take() {
            timer.cancel();
        }
        entry.timer = Some(self.schedule_deadline(entry.proposal.id.clone(), Duration::from_millis(remaining)));

        info!(
            "Voting deadline for {} extended to {}",
            entry.proposal.id, entry.proposal.voting_deadline
        );

        let snapshot = entry.proposal.clone();
        let deadline = snapshot.voting_deadline;
        drop(proposals);
        self.events.emit(ConsensusEvent::ProposalUpdated { proposal: snapshot });

        Ok(deadline)
    }

    pub async fn update_agent_status(&self, agent: impl Into<AgentId>, status: AgentStatus) {
        let agent = agent.into();
        debug!("Agent {} is now {}", agent, status);
        self.agents.write().await.insert(agent, status);
    }

    pub async fn agent_status(&self, agent: &str) -> Option<AgentStatus> {
        self.agents.read().await.get(agent).copied()
    }

    /// Forget an agent and strip its votes and delegations from open
    /// proposals. Proposals are not re-evaluated; use [`Self::recheck`].
    ///
    /// Returns the number of votes removed.
    pub async fn remove_agent(&self, agent: &str) -> usize {
        self.agents.write().await.remove(agent);

        let mut stripped = 0;
        let mut updated = Vec::new();
        {
            let mut proposals = self.proposals.write().await;
            for entry in proposals.values_mut() {
                let proposal = &mut entry.proposal;
                if !proposal.is_active() {
                    continue;
                }

                let removed_vote = proposal.remove_vote(agent).is_some();
                let delegations = proposal.delegations.len();
                proposal
                    .delegations
                    .retain(|from, to| from.as_str() != agent && to.as_str() != agent);

                if removed_vote {
                    stripped += 1;
                }
                if removed_vote || delegations != proposal.delegations.len() {
                    updated.push(proposal.clone());
                }
            }
        }

        info!("Removed agent {} ({} votes stripped)", agent, stripped);

        for proposal in updated {
            self.events.emit(ConsensusEvent::ProposalUpdated { proposal });
        }

        stripped
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> Option<ConsensusProposal> {
        let proposals = self.proposals.read().await;
        proposals.get(proposal_id).map(|e| e.proposal.clone())
    }

    pub async fn get_all_proposals(&self) -> Vec<ConsensusProposal> {
        self.collect(|_| true).await
    }

    pub async fn get_proposals_by_status(&self, status: ConsensusStatus) -> Vec<ConsensusProposal> {
        self.collect(|p| p.status == status).await
    }

    pub async fn get_proposals_by_type(&self, consensus_type: ConsensusType) -> Vec<ConsensusProposal> {
        self.collect(|p| p.consensus_type == consensus_type).await
    }

    pub async fn get_active_proposals(&self) -> Vec<ConsensusProposal> {
        self.collect(ConsensusProposal::is_active).await
    }

    pub async fn get_metrics(&self) -> ConsensusMetrics {
        let active_agents = {
            let agents = self.agents.read().await;
            agents.values().filter(|s| s.is_available()).count()
        };

        let (active_votes, active_proposals) = {
            let proposals = self.proposals.read().await;
            proposals
                .values()
                .filter(|e| e.proposal.is_active())
                .fold((0, 0), |(votes, count), e| (votes + e.proposal.vote_count(), count + 1))
        };

        let mut metrics = self.metrics.read().await.clone();
        metrics.participation_rate = participation_rate(active_votes, active_agents, active_proposals);
        metrics
    }

    async fn collect<F>(&self, filter: F) -> Vec<ConsensusProposal>
    where
        F: Fn(&ConsensusProposal) -> bool,
    {
        let proposals = self.proposals.read().await;
        let mut matching: Vec<_> = proposals
            .values()
            .map(|e| &e.proposal)
            .filter(|p| filter(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matching
    }

    fn default_weight(
        &self,
        proposal: &ConsensusProposal,
        voter: &str,
        agents: &HashMap<AgentId, AgentStatus>,
    ) -> f64 {
        let own = self.weight_policy.vote_weight(voter, agents.get(voter).copied());
        if proposal.consensus_type != ConsensusType::Delegated {
            return own;
        }

        let delegated: f64 = proposal
            .delegators_of(voter)
            .map(|d| self.weight_policy.vote_weight(d, agents.get(d).copied()))
            .sum();
        own + delegated
    }

    fn schedule_deadline(self: &Arc<Self>, proposal_id: ProposalId, after: Duration) -> DeadlineTimer {
        let manager: Weak<Self> = Arc::downgrade(self);
        DeadlineTimer::schedule(after, async move {
            if let Some(manager) = manager.upgrade() {
                manager.handle_timeout(&proposal_id).await;
            }
        })
    }

    async fn handle_timeout(&self, proposal_id: &str) {
        let mut proposals = self.proposals.write().await;
        let Some(entry) = proposals.get_mut(proposal_id) else {
            return;
        };

        if entry.proposal.status != ConsensusStatus::Voting {
            debug!("Ignoring stale timer for {} ({})", proposal_id, entry.proposal.status);
            return;
        }

        let vote_count = entry.proposal.vote_count();
        warn!(
            "Voting deadline reached for {} with {}/{} votes",
            proposal_id, vote_count, entry.proposal.required_quorum
        );
        self.events.emit(ConsensusEvent::TimeoutExpired {
            proposal_id: proposal_id.to_string(),
            vote_count,
        });

        let now = now_millis();
        let strategy = self.strategies.get(&entry.proposal.consensus_type).cloned();
        let resolution = match strategy {
            Some(strategy) if entry.proposal.has_quorum_count() => {
                let verdict = strategy.evaluate(&entry.proposal);
                let (status, reason) = if verdict.has_consensus {
                    (ConsensusStatus::Accepted, "consensus reached at deadline")
                } else {
                    (ConsensusStatus::Rejected, "consensus not reached by deadline")
                };
                self.resolve(entry, status, reason.to_string(), verdict.breakdown, now, TimerDisposition::Detach)
            }
            _ => {
                let breakdown = entry.proposal.breakdown();
                self.resolve(
                    entry,
                    ConsensusStatus::Expired,
                    "quorum not reached".to_string(),
                    breakdown,
                    now,
                    TimerDisposition::Detach,
                )
            }
        };

        self.record_resolution(resolution).await;
    }

    /// Run the proposal's strategy and resolve it if the verdict allows
    fn evaluate_entry(&self, entry: &mut ProposalEntry, now: u64) -> Option<Resolution> {
        let Some(strategy) = self.strategies.get(&entry.proposal.consensus_type) else {
            warn!("No strategy for {}", entry.proposal.consensus_type);
            return None;
        };
        let verdict = strategy.evaluate(&entry.proposal);

        if verdict.has_quorum && !entry.quorum_announced {
            entry.quorum_announced = true;
            info!(
                "Quorum reached on {} ({}/{})",
                entry.proposal.id,
                entry.proposal.vote_count(),
                entry.proposal.required_quorum
            );
            self.events.emit(ConsensusEvent::QuorumReached {
                proposal_id: entry.proposal.id.clone(),
                vote_count: entry.proposal.vote_count(),
                required_quorum: entry.proposal.required_quorum,
            });
        }

        if verdict.has_quorum && verdict.has_consensus {
            Some(self.resolve(
                entry,
                ConsensusStatus::Accepted,
                "consensus reached".to_string(),
                verdict.breakdown,
                now,
                TimerDisposition::Cancel,
            ))
        } else if verdict.has_quorum && verdict.is_definitive {
            Some(self.resolve(
                entry,
                ConsensusStatus::Rejected,
                "consensus not reached".to_string(),
                verdict.breakdown,
                now,
                TimerDisposition::Cancel,
            ))
        } else {
            None
        }
    }

    /// Move an unresolved proposal to a terminal status. Always releases the
    /// deadline timer first.
    fn resolve(
        &self,
        entry: &mut ProposalEntry,
        status: ConsensusStatus,
        reason: String,
        breakdown: VoteBreakdown,
        now: u64,
        timer: TimerDisposition,
    ) -> Resolution {
        if let Some(handle) = entry.timer.take() {
            match timer {
                TimerDisposition::Cancel => handle.cancel(),
                TimerDisposition::Detach => handle.detach(),
            }
        }

        let proposal = &mut entry.proposal;
        proposal.status = status;
        proposal.result = Some(ConsensusResult {
            reason: reason.clone(),
            breakdown,
        });
        proposal.resolved_at = Some(now);

        info!(
            "Proposal {} resolved as {} ({}; approve {}, reject {}, abstain {})",
            proposal.id, status, reason, breakdown.approve, breakdown.reject, breakdown.abstain
        );

        if status == ConsensusStatus::Accepted {
            self.events.emit(ConsensusEvent::ConsensusReached {
                proposal_id: proposal.id.clone(),
                status,
                breakdown,
            });
        } else {
            self.events.emit(ConsensusEvent::ConsensusFailed {
                proposal_id: proposal.id.clone(),
                status,
                reason,
            });
        }

        let snapshot = proposal.clone();
        if let Some(notifier) = &self.notifier {
            notifier.proposal_resolved(&snapshot);
        }

        let resolution = Resolution {
            consensus_type: snapshot.consensus_type,
            status,
            elapsed_ms: now.saturating_sub(snapshot.created_at),
        };
        self.events.emit(ConsensusEvent::ProposalResolved { proposal: snapshot });

        resolution
    }

    async fn record_resolution(&self, resolution: Resolution) {
        self.metrics
            .write()
            .await
            .record_resolution(resolution.consensus_type, resolution.status, resolution.elapsed_ms);
    }
}

/// `start + span` in milliseconds, rejecting spans past the end of the clock
fn deadline_after(start: u64, span: Duration) -> Result<u64, ConsensusError> {
    u64::try_from(span.as_millis())
        .ok()
        .and_then(|ms| start.checked_add(ms))
        .ok_or_else(|| {
            ConsensusError::InvalidProposal(format!("voting window of {}ms is out of range", span.as_millis()))
        })
}
