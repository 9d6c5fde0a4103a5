use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::gateway::Lifecycle;
use crate::rpc::WsState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    hubs: usize,
    rooms: usize,
    plants: usize,
}

async fn health(State(state): State<Arc<WsState>>) -> Json<HealthResponse> {
    let status = match state.gateway.lifecycle().await {
        Lifecycle::Created => "starting",
        Lifecycle::Opened => "ok",
        Lifecycle::Closed => "closed",
    };
    let registry = state.gateway.registry();

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        hubs: state.hubs.count().await,
        rooms: registry.rooms.len().await,
        plants: registry.plants.len().await,
    })
}

pub fn router(state: Arc<WsState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}
