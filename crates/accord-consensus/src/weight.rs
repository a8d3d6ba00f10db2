use std::collections::HashMap;

use accord_core::{AgentId, AgentStatus};

/// Default vote weight for a voter when the caller supplies none
pub trait WeightPolicy: Send + Sync {
    fn vote_weight(&self, voter: &str, status: Option<AgentStatus>) -> f64;
}

/// Liveness based weights: 0 for failed/terminated agents, the agent's base
/// weight (default 1) otherwise.
#[derive(Debug, Clone, Default)]
pub struct LivenessWeight {
    base_weights: HashMap<AgentId, f64>,
}

impl LivenessWeight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_weights(base_weights: HashMap<AgentId, f64>) -> Self {
        let base_weights = base_weights
            .into_iter()
            .filter(|(_, w)| w.is_finite() && *w >= 0.0)
            .collect();
        LivenessWeight { base_weights }
    }
}

impl WeightPolicy for LivenessWeight {
    fn vote_weight(&self, voter: &str, status: Option<AgentStatus>) -> f64 {
        match status {
            Some(s) if !s.is_available() => 0.0,
            _ => self.base_weights.get(voter).copied().unwrap_or(1.0),
        }
    }
}
