//! Carries consensus traffic over the communication layer.
//!
//! Local proposals and their resolutions are broadcast to every known
//! agent. Inbound `consensus.*` envelopes are decoded and applied: votes to
//! the local consensus manager, announcements to the remote proposal book.

use std::sync::Arc;

use accord_comm::{CommError, CommunicationManager, SendOptions};
use accord_consensus::{
    ConsensusError, ConsensusManager, ProposalNotice, ProposalNotifier, RemoteProposals,
    ResolutionNotice, VoteRequest, PROPOSAL_MESSAGE, RESOLUTION_MESSAGE, VOTE_MESSAGE,
};
use accord_core::{AgentId, ConsensusProposal, ConsensusStatus, Message, MessagePriority};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound consensus announcement
#[derive(Debug, Clone)]
pub enum Announcement {
    Proposal(ConsensusProposal),
    Resolution(ResolutionNotice),
}

/// Notifier that hands announcements to a background publisher
pub struct BroadcastNotifier {
    tx: mpsc::UnboundedSender<Announcement>,
}

impl BroadcastNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Announcement>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BroadcastNotifier { tx }, rx)
    }
}

impl ProposalNotifier for BroadcastNotifier {
    fn proposal_created(&self, proposal: &ConsensusProposal) -> Result<(), ConsensusError> {
        // announced as open, which it is once creation returns
        let mut announced = proposal.clone();
        announced.status = ConsensusStatus::Voting;

        self.tx
            .send(Announcement::Proposal(announced))
            .map_err(|_| ConsensusError::Notify("announcement publisher stopped".to_string()))
    }

    fn proposal_resolved(&self, proposal: &ConsensusProposal) {
        if self.tx.send(Announcement::Resolution(proposal.into())).is_err() {
            warn!("Resolution of {} not announced: publisher stopped", proposal.id);
        }
    }
}

/// Broadcast announcements until every notifier is dropped
pub async fn run_announcements(
    comm: Arc<CommunicationManager>,
    mut rx: mpsc::UnboundedReceiver<Announcement>,
) {
    while let Some(announcement) = rx.recv().await {
        if let Err(e) = publish(&comm, announcement).await {
            warn!("Failed to publish announcement: {}", e);
        }
    }
    debug!("Announcement publisher stopped");
}

async fn publish(comm: &CommunicationManager, announcement: Announcement) -> Result<(), CommError> {
    let (message_type, id, payload) = match announcement {
        Announcement::Proposal(proposal) => {
            let id = proposal.id.clone();
            (PROPOSAL_MESSAGE, id, encode(&ProposalNotice { proposal })?)
        }
        Announcement::Resolution(notice) => {
            let id = notice.proposal_id.clone();
            (RESOLUTION_MESSAGE, id, encode(&notice)?)
        }
    };

    let options = SendOptions::default().with_priority(MessagePriority::High);
    let report = comm.broadcast_message(message_type, payload, options).await?;
    info!(
        "Announced {} for {} to {} agents ({} queued)",
        message_type,
        id,
        report.delivered.len(),
        report.queued.len()
    );
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, CommError> {
    serde_json::to_value(value).map_err(|e| CommError::Codec(e.to_string()))
}

/// Decoded inbound consensus envelope
#[derive(Debug, Clone)]
pub enum Inbound {
    Proposal(ProposalNotice),
    Vote(VoteRequest),
    Resolution(ResolutionNotice),
}

impl Inbound {
    /// `None` for message types outside the consensus protocol
    pub fn decode(message: &Message) -> Result<Option<Self>, CommError> {
        let payload = message.payload.clone();
        let decoded = match message.message_type.as_str() {
            PROPOSAL_MESSAGE => Inbound::Proposal(decode_payload(payload)?),
            VOTE_MESSAGE => Inbound::Vote(decode_payload(payload)?),
            RESOLUTION_MESSAGE => Inbound::Resolution(decode_payload(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T, CommError> {
    serde_json::from_value(payload).map_err(|e| CommError::InvalidMessage(e.to_string()))
}

/// Register the inbound handler for consensus envelopes and return the
/// stream of decoded messages with their sender
pub async fn register_inbound(comm: &CommunicationManager) -> mpsc::UnboundedReceiver<(AgentId, Inbound)> {
    let (tx, rx) = mpsc::unbounded_channel();

    comm.register_message_handler(
        "consensus.*",
        Arc::new(move |message: &Message| -> Result<(), CommError> {
            let Some(inbound) = Inbound::decode(message)? else {
                return Ok(());
            };
            tx.send((message.from.clone(), inbound))
                .map_err(|_| CommError::Handler("consensus bridge stopped".to_string()))
        }),
    )
    .await;

    rx
}

/// Apply inbound consensus traffic until the handler is dropped
pub async fn run_inbound(
    consensus: Arc<ConsensusManager>,
    remote: Arc<RemoteProposals>,
    mut rx: mpsc::UnboundedReceiver<(AgentId, Inbound)>,
) {
    while let Some((from, inbound)) = rx.recv().await {
        apply(&consensus, &remote, &from, inbound).await;
    }
    debug!("Consensus bridge stopped");
}

pub async fn apply(consensus: &ConsensusManager, remote: &RemoteProposals, from: &str, inbound: Inbound) {
    match inbound {
        Inbound::Proposal(notice) => remote.record(notice).await,
        Inbound::Vote(vote) => {
            let proposal_id = vote.proposal_id.clone();
            match consensus
                .cast_vote(&proposal_id, vote.voter, vote.decision, vote.reasoning, vote.weight)
                .await
            {
                Ok(status) => debug!("Remote vote from {} on {} applied ({})", from, proposal_id, status),
                Err(e) => warn!("Remote vote from {} on {} rejected: {}", from, proposal_id, e),
            }
        }
        Inbound::Resolution(notice) => {
            if !remote.resolve(&notice).await {
                debug!("Resolution for unknown proposal {} from {}", notice.proposal_id, from);
            }
        }
    }
}
