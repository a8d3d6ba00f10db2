use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::{generate_id, now_millis};
use crate::types::agent::AgentId;

pub type MessageId = String;

/// Reserved liveness-check message type
pub const HEARTBEAT: &str = "heartbeat";
/// Automatic reply to a heartbeat
pub const HEARTBEAT_RESPONSE: &str = "heartbeat_response";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Critical => "critical",
        }
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessagePriority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(MessagePriority::Low),
            "normal" => Ok(MessagePriority::Normal),
            "high" => Ok(MessagePriority::High),
            "critical" => Ok(MessagePriority::Critical),
            other => Err(CoreError::UnknownPriority(other.to_string())),
        }
    }
}

/// Addressee of an envelope: one agent or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
    One(AgentId),
    Many(Vec<AgentId>),
}

impl Recipient {
    pub fn one(agent: impl Into<AgentId>) -> Self {
        Recipient::One(agent.into())
    }

    pub fn many<I, S>(agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AgentId>,
    {
        Recipient::Many(agents.into_iter().map(Into::into).collect())
    }

    pub fn agents(&self) -> Vec<&str> {
        match self {
            Recipient::One(agent) => vec![agent.as_str()],
            Recipient::Many(agents) => agents.iter().map(String::as_str).collect(),
        }
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.agents().contains(&agent)
    }
}

/// Transport unit carrying a typed, addressed payload between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: AgentId,
    pub to: Recipient,
    #[serde(rename = "type")]
    pub message_type: String,
    /// Opaque to the transport layer
    pub payload: serde_json::Value,
    /// Milliseconds since epoch
    pub timestamp: u64,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    pub fn new(
        from: impl Into<AgentId>,
        to: Recipient,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Message {
            id: generate_id("msg"),
            from: from.into(),
            to,
            message_type: message_type.into(),
            payload,
            timestamp: now_millis(),
            priority: MessagePriority::Normal,
            encrypted: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_heartbeat(&self) -> bool {
        self.message_type == HEARTBEAT
    }

    /// Liveness reply addressed back to the sender of this heartbeat
    pub fn heartbeat_reply(&self, responder: impl Into<AgentId>) -> Message {
        Message::new(
            responder,
            Recipient::One(self.from.clone()),
            HEARTBEAT_RESPONSE,
            serde_json::json!({ "in_reply_to": self.id }),
        )
        .with_priority(MessagePriority::High)
    }
}
