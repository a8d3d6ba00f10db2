//! Accord Core - Shared data model and serialization
//!
//! This crate provides the proposal, vote, agent and message envelope types
//! used by the consensus and communication layers.

pub mod error;
pub mod events;
pub mod id;
pub mod serialize;
pub mod types;

pub use error::CoreError;
pub use events::EventBroadcaster;
pub use id::{generate_id, now_millis};
pub use types::*;
