use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Unknown consensus type: {0}")]
    UnknownConsensusType(String),

    #[error("Unknown proposal status: {0}")]
    UnknownStatus(String),

    #[error("Unknown vote decision: {0}")]
    UnknownDecision(String),

    #[error("Unknown agent status: {0}")]
    UnknownAgentStatus(String),

    #[error("Unknown message priority: {0}")]
    UnknownPriority(String),
}
