use std::collections::{HashMap, VecDeque};

use accord_core::{AgentId, ConsensusProposal, ProposalId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::net::{ProposalNotice, ResolutionNotice};

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_RESOLVED_RETENTION: usize = 256;

#[derive(Default)]
struct Book {
    proposals: HashMap<ProposalId, ConsensusProposal>,
    /// Resolved ids, oldest resolution first
    resolved: VecDeque<ProposalId>,
}

impl Book {
    fn evict_oldest(&mut self) {
        let victim = match self.resolved.pop_front() {
            Some(id) => id,
            None => match self
                .proposals
                .values()
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            {
                Some(oldest) => oldest.id.clone(),
                None => return,
            },
        };
        debug!("Forgetting remote proposal {}", victim);
        self.proposals.remove(&victim);
    }
}

/// Proposals owned by other agents, as last announced over the wire.
///
/// Votes on these are forwarded to the proposer rather than cast locally.
/// Resolved entries are kept for a while for lookups, then dropped oldest
/// first; the whole book never holds more than `capacity` proposals.
pub struct RemoteProposals {
    book: RwLock<Book>,
    capacity: usize,
    resolved_retention: usize,
}

impl Default for RemoteProposals {
    fn default() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_RESOLVED_RETENTION)
    }
}

impl RemoteProposals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(capacity: usize, resolved_retention: usize) -> Self {
        Self {
            book: RwLock::new(Book::default()),
            capacity: capacity.max(1),
            resolved_retention,
        }
    }

    pub async fn record(&self, notice: ProposalNotice) {
        let proposal = notice.proposal;
        debug!("Learned proposal {} from {}", proposal.id, proposal.proposer);
        let mut book = self.book.write().await;
        book.resolved.retain(|id| *id != proposal.id);
        book.proposals.insert(proposal.id.clone(), proposal);
        while book.proposals.len() > self.capacity {
            book.evict_oldest();
        }
    }

    /// Apply a resolution. Returns false for proposals never announced.
    pub async fn resolve(&self, notice: &ResolutionNotice) -> bool {
        let mut book = self.book.write().await;
        let Some(proposal) = book.proposals.get_mut(&notice.proposal_id) else {
            return false;
        };
        proposal.status = notice.status;
        proposal.result = notice.result.clone();

        if !book.resolved.contains(&notice.proposal_id) {
            book.resolved.push_back(notice.proposal_id.clone());
        }
        while book.resolved.len() > self.resolved_retention {
            if let Some(expired) = book.resolved.pop_front() {
                book.proposals.remove(&expired);
            }
        }
        true
    }

    pub async fn get(&self, proposal_id: &str) -> Option<ConsensusProposal> {
        self.book.read().await.proposals.get(proposal_id).cloned()
    }

    pub async fn proposer_of(&self, proposal_id: &str) -> Option<AgentId> {
        self.book
            .read()
            .await
            .proposals
            .get(proposal_id)
            .map(|p| p.proposer.clone())
    }

    pub async fn list(&self) -> Vec<ConsensusProposal> {
        let mut proposals: Vec<_> = self.book.read().await.proposals.values().cloned().collect();
        proposals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        proposals
    }

    pub async fn len(&self) -> usize {
        self.book.read().await.proposals.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.book.read().await.proposals.is_empty()
    }
}
