//! HTTP Router
//!
//! Sets up the axum router with the WebSocket endpoint and the status
//! surface.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;

use super::handler::handle_socket;
use crate::hub::Hub;

/// Create the application router
pub fn create_router(hub: Arc<Hub>) -> Router {
    Router::new()
        // WebSocket endpoint - all peer communication goes through here
        .route("/ws", get(ws_upgrade))
        // Liveness probe for monitoring
        .route("/health", get(health_check))
        // Full hub snapshot: peers, supervisor table, health table
        .route("/status", get(status))
        // CORS for overlay pages served from other origins
        .layer(CorsLayer::permissive())
        .with_state(hub)
}

/// WebSocket upgrade handler
async fn ws_upgrade(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    peers: usize,
}

/// Health check endpoint
async fn health_check(State(hub): State<Arc<Hub>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        peers: hub.active_peers().await,
    })
}

/// Status snapshot endpoint
async fn status(State(hub): State<Arc<Hub>>) -> Json<Value> {
    Json(hub.snapshot().await)
}
