pub mod agent;
pub mod message;
pub mod proposal;
pub mod vote;

pub use agent::{AgentId, AgentStatus};
pub use message::{Message, MessageId, MessagePriority, Recipient, HEARTBEAT, HEARTBEAT_RESPONSE};
pub use proposal::{ConsensusProposal, ConsensusResult, ConsensusStatus, ConsensusType, ProposalId};
pub use vote::{Vote, VoteBreakdown, VoteDecision};
