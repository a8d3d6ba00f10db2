use accord_core::{AgentId, Message, MessageId};
use serde::Serialize;

/// Notifications published by the communication manager
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum CommEvent {
    MessageSent {
        message: Message,
    },
    MessageReceived {
        message: Message,
    },
    MessageDelivered {
        message_id: MessageId,
        recipient: AgentId,
    },
    MessageQueued {
        message_id: MessageId,
        recipient: AgentId,
        queue_len: usize,
    },
    MessageFailed {
        message_id: MessageId,
        recipient: AgentId,
        reason: String,
    },
    ConnectionEstablished {
        agent_id: AgentId,
        flushed: usize,
    },
    ConnectionLost {
        agent_id: AgentId,
        reason: String,
    },
    BroadcastSent {
        message_id: MessageId,
        recipients: usize,
    },
    MulticastSent {
        message_id: MessageId,
        recipients: Vec<AgentId>,
    },
}

impl CommEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CommEvent::MessageSent { .. } => "message_sent",
            CommEvent::MessageReceived { .. } => "message_received",
            CommEvent::MessageDelivered { .. } => "message_delivered",
            CommEvent::MessageQueued { .. } => "message_queued",
            CommEvent::MessageFailed { .. } => "message_failed",
            CommEvent::ConnectionEstablished { .. } => "connection_established",
            CommEvent::ConnectionLost { .. } => "connection_lost",
            CommEvent::BroadcastSent { .. } => "broadcast_sent",
            CommEvent::MulticastSent { .. } => "multicast_sent",
        }
    }
}
