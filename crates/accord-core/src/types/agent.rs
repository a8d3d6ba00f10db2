use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identity string supplied by the host runtime
pub type AgentId = String;

/// Liveness state of an agent as reported by the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Failed,
    Terminated,
}

impl AgentStatus {
    /// Failed and terminated agents no longer count as voters
    pub fn is_available(&self) -> bool {
        !matches!(self, AgentStatus::Failed | AgentStatus::Terminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Failed => "failed",
            AgentStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "failed" => Ok(AgentStatus::Failed),
            "terminated" => Ok(AgentStatus::Terminated),
            other => Err(CoreError::UnknownAgentStatus(other.to_string())),
        }
    }
}
