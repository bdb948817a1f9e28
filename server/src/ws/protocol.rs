use crate::chat::{Hub, RoomError, RoomHandle};
use crate::proto::{Envelope, MessageType};
use crate::ws::ConnectionId;

/// Handle an incoming text frame.
/// Decodes the envelope and forwards the intent to the room. Malformed frames
/// and unknown type tags are logged and skipped; only an unreachable room is
/// reported back, since the connection cannot continue without one.
pub async fn handle_text_message(
    text: &str,
    conn: ConnectionId,
    room: &RoomHandle,
    hub: &Hub,
) -> Result<(), RoomError> {
    let envelope = match Envelope::decode(text) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(
                conn_id = conn,
                room = %room.name(),
                error = %e,
                "Failed to decode frame"
            );
            return Ok(());
        }
    };

    dispatch(envelope, conn, room, hub).await
}

/// Dispatch a decoded envelope to the matching room entry point.
async fn dispatch(
    envelope: Envelope,
    conn: ConnectionId,
    room: &RoomHandle,
    hub: &Hub,
) -> Result<(), RoomError> {
    match envelope.kind {
        MessageType::SetUsername => {
            room.set_username(conn, envelope.username.unwrap_or_default())
                .await
        }
        MessageType::Chat => room.chat(conn, envelope.content.unwrap_or_default()).await,
        MessageType::Typing => room.typing(conn).await,
        MessageType::GetRoomList => {
            hub.publish_room_list().await;
            Ok(())
        }
        MessageType::RoomList | MessageType::Error | MessageType::RoomAdded => {
            tracing::debug!(
                conn_id = conn,
                kind = ?envelope.kind,
                "Ignoring server-only frame type from client"
            );
            Ok(())
        }
        MessageType::Unknown => {
            tracing::warn!(conn_id = conn, room = %room.name(), "Unknown message type");
            Ok(())
        }
    }
}
