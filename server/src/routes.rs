use axum::{extract::State, routing::get, Json, Router};

use crate::chat::landing;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // Browser client and room listing
    let public_routes = Router::new()
        .route("/", get(landing::client_page))
        .route("/rooms", get(list_rooms));

    // WebSocket endpoint (room via query param)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(public_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// GET /rooms
/// Sorted names of the rooms that currently exist.
async fn list_rooms(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.hub.room_names())
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
