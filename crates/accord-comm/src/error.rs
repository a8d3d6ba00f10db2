use accord_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Message not found in any pending queue: {0}")]
    MessageNotFound(String),

    #[error("No route registered for pattern {0}")]
    RouteNotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Handshake with {agent} timed out after {timeout_ms}ms")]
    HandshakeTimeout { agent: String, timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Route handler failed: {0}")]
    Handler(String),

    #[error("Middleware failed: {0}")]
    Middleware(String),

    #[error("Routing exceeded {0} follow-up messages")]
    RoutingDepthExceeded(usize),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}
