use accord_comm::CommEvent;
use accord_consensus::ConsensusEvent;
use serde::Serialize;

/// Event pushed to WebSocket clients, tagged with the manager it came from
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", content = "event", rename_all = "snake_case")]
pub enum WsEvent {
    Consensus(ConsensusEvent),
    Communication(CommEvent),
}

impl WsEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WsEvent::Consensus(event) => event.name(),
            WsEvent::Communication(event) => event.name(),
        }
    }
}

impl From<ConsensusEvent> for WsEvent {
    fn from(event: ConsensusEvent) -> Self {
        WsEvent::Consensus(event)
    }
}

impl From<CommEvent> for WsEvent {
    fn from(event: CommEvent) -> Self {
        WsEvent::Communication(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_event_shape() {
        let event: WsEvent = CommEvent::ConnectionLost {
            agent_id: "b".to_string(),
            reason: "closed by peer".to_string(),
        }
        .into();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "communication");
        assert_eq!(json["event"]["event"], "connection_lost");
        assert_eq!(json["event"]["data"]["agent_id"], "b");
        assert_eq!(event.name(), "connection_lost");
    }
}
