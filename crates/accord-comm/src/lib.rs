//! Accord Comm - Agent communication substrate
//!
//! This crate provides message routing with middleware, per-agent outbound
//! queues, connection lifecycle over pluggable transports (TCP and
//! in-process), retry bookkeeping and heartbeats.

pub mod connection;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod routing;
pub mod tcp;

pub use connection::{ChannelTransport, ConnectionStatus, Transport};
pub use error::CommError;
pub use events::CommEvent;
pub use manager::{
    CommConfig, CommunicationManager, DeliveryReport, FailedDelivery, MessageHandler, RetryOutcome,
    SendOptions,
};
pub use metrics::CommMetrics;
pub use queue::OutboundQueue;
pub use routing::{Middleware, Next, Route, RouteHandler, RoutePattern, Router};
pub use tcp::{Frame, TcpTransport, DEFAULT_MAX_FRAME_SIZE};
