use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;

use crate::chat::AdmissionError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsRoomQuery {
    pub room: Option<String>,
}

/// GET /ws?room=NAME
/// WebSocket upgrade endpoint. Resolves the room and reserves a member slot
/// before upgrading, so a rejected client gets a plain HTTP error instead of a
/// socket. The slot is released if the upgrade never completes.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsRoomQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, (StatusCode, String)> {
    let name = params.room.unwrap_or_default();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Room name required".to_string()));
    }

    let reservation = match state.hub.admit(&name).await {
        Ok(reservation) => reservation,
        Err(err @ AdmissionError::Full { .. }) => {
            tracing::info!(room = %name, "Rejected connection: room full");
            return Err((StatusCode::FORBIDDEN, err.to_string()));
        }
        Err(err @ AdmissionError::Unavailable) => {
            tracing::warn!(room = %name, "Rejected connection: room unavailable");
            return Err((StatusCode::SERVICE_UNAVAILABLE, err.to_string()));
        }
    };

    tracing::info!(room = %name, "WebSocket connection admitted");

    Ok(ws
        .max_message_size(state.connection.max_frame_bytes)
        .on_upgrade(move |socket| actor::run_connection(socket, state, reservation)))
}
