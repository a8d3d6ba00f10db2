use std::sync::Arc;

use accord_comm::CommunicationManager;
use accord_consensus::ConsensusManager;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::events::WsEvent;

/// Sources of events forwarded to WebSocket clients
pub struct WsState {
    pub consensus: Arc<ConsensusManager>,
    pub comm: Arc<CommunicationManager>,
}

/// Create WebSocket router
pub fn create_ws_router(consensus: Arc<ConsensusManager>, comm: Arc<CommunicationManager>) -> Router {
    let state = Arc::new(WsState { consensus, comm });

    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Outcome of polling one event stream
enum Received {
    Event(WsEvent),
    Skip,
    Closed,
}

fn receive<E>(result: Result<E, broadcast::error::RecvError>) -> Received
where
    E: Into<WsEvent>,
{
    match result {
        Ok(event) => Received::Event(event.into()),
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!("WebSocket client lagged {} events", n);
            Received::Skip
        }
        Err(broadcast::error::RecvError::Closed) => Received::Closed,
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut consensus_rx = state.consensus.subscribe();
    let mut comm_rx = state.comm.subscribe();

    info!("New WebSocket connection");

    let send_task = tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                result = consensus_rx.recv() => receive(result),
                result = comm_rx.recv() => receive(result),
            };

            let event = match received {
                Received::Event(event) => event,
                Received::Skip => continue,
                Received::Closed => {
                    debug!("Event channel closed");
                    break;
                }
            };

            let json = match to_text(&event) {
                Some(json) => json,
                None => continue,
            };

            if let Err(e) = sender.send(Message::Text(json.into())).await {
                warn!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!("Client closed connection");
                    break;
                }
                Ok(Message::Text(text)) => debug!("Ignoring client message: {}", text),
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    info!("WebSocket connection closed");
}

fn to_text<T: Serialize>(event: &T) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            None
        }
    }
}
