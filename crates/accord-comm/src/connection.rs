use accord_core::{AgentId, Message};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::CommError;

/// Live handle to one remote agent.
///
/// `send` must not block; implementations hand the frame to a writer task
/// or channel.
pub trait Transport: Send + Sync {
    fn send(&self, message: &Message) -> Result<(), CommError>;

    fn close(&self);

    fn is_open(&self) -> bool;
}

/// In-process transport backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelTransport {
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        ChannelTransport { sender }
    }

    /// A transport plus the receiving end it writes into
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelTransport { sender }, receiver)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: &Message) -> Result<(), CommError> {
        self.sender
            .send(message.clone())
            .map_err(|_| CommError::Transport("channel receiver dropped".to_string()))
    }

    fn close(&self) {}

    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Snapshot of one agent's connection and queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub agent_id: AgentId,
    pub connected: bool,
    pub connected_at: Option<u64>,
    pub last_activity: Option<u64>,
    pub queued_messages: usize,
}
