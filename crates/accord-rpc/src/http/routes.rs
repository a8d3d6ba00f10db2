use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    cast_vote, create_proposal, delegate_vote, extend_deadline, get_connections, get_metrics,
    get_proposal, get_status, list_proposals, remove_agent, retry_message, send_message,
    update_agent_status, withdraw_proposal, AppState,
};

/// Create the HTTP router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(get_status))
        .route("/proposals", get(list_proposals).post(create_proposal))
        .route("/proposals/{id}", get(get_proposal))
        .route("/proposals/{id}/votes", post(cast_vote))
        .route("/proposals/{id}/withdraw", post(withdraw_proposal))
        .route("/proposals/{id}/delegate", post(delegate_vote))
        .route("/proposals/{id}/extend", post(extend_deadline))
        .route("/agents/{id}/status", put(update_agent_status))
        .route("/agents/{id}", delete(remove_agent))
        .route("/metrics", get(get_metrics))
        .route("/connections", get(get_connections))
        .route("/messages", post(send_message))
        .route("/messages/{id}/retry", post(retry_message))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
