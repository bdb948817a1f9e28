use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::chat::{Hub, RoomError, RoomHandle, RoomReservation};
use crate::config::ConnectionSettings;
use crate::proto::Frame;
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::{next_connection_id, outbound_queue, ConnectionId, OutboundReceiver};

/// Outbound write failures. Each one ends the connection.
#[derive(Debug, Error)]
enum WriteError {
    #[error("write deadline exceeded")]
    Timeout,
    #[error(transparent)]
    Socket(#[from] axum::Error),
}

/// Run the pump pair for one upgraded socket admitted through `reservation`.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the outbound queue the room pushes
///   into, and sends periodic pings
/// - Reader loop: decodes frames and forwards intents to the room
///
/// Whichever side stops first ends the connection. The reader always sends
/// `Leave` on the way out; that is the only path that removes this connection
/// from its room.
pub async fn run_connection(socket: WebSocket, state: AppState, reservation: RoomReservation) {
    let settings = Arc::clone(&state.connection);
    let conn = next_connection_id();

    let joined = join_room(&state.hub, reservation, conn, settings.outbound_queue_capacity).await;
    let Some((room, outbound_rx)) = joined else {
        tracing::warn!(conn_id = conn, "Room unavailable, dropping connection");
        return;
    };

    tracing::info!(conn_id = conn, room = %room.name(), "WebSocket actor started");

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut writer = tokio::spawn(writer_task(ws_sender, outbound_rx, Arc::clone(&settings), conn));
    let mut writer_done = false;

    // Reader loop: any inbound frame, pongs included, restarts the read window
    loop {
        tokio::select! {
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            read = timeout(settings.pong_wait, ws_receiver.next()) => match read {
                Err(_) => {
                    tracing::info!(conn_id = conn, "Read deadline exceeded, closing");
                    break;
                }
                Ok(None) => {
                    tracing::info!(conn_id = conn, "WebSocket stream ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(conn_id = conn, error = %e, "WebSocket receive error");
                    break;
                }
                Ok(Some(Ok(msg))) => match msg {
                    Message::Text(text) => {
                        let handled =
                            protocol::handle_text_message(text.as_str(), conn, &room, &state.hub)
                                .await;
                        if let Err(RoomError::Closed) = handled {
                            break;
                        }
                    }
                    Message::Binary(data) => {
                        tracing::debug!(conn_id = conn, len = data.len(), "Ignoring binary frame");
                    }
                    // Liveness only; tungstenite answers pings itself
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(frame) => {
                        tracing::info!(conn_id = conn, reason = ?frame, "Client initiated close");
                        break;
                    }
                },
            }
        }
    }

    if room.leave(conn).await.is_err() {
        tracing::debug!(conn_id = conn, room = %room.name(), "Room already closed on leave");
    }

    // Leaving closed the outbound queue; give the writer one write window to
    // flush and send its close frame.
    if !writer_done && timeout(settings.write_wait, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(conn_id = conn, room = %room.name(), "WebSocket actor stopped");
}

/// Join the reserved room. If it retired after admission, admit once more
/// (capacity included) into the fresh room of the same name.
async fn join_room(
    hub: &Hub,
    reservation: RoomReservation,
    conn: ConnectionId,
    queue_capacity: usize,
) -> Option<(RoomHandle, OutboundReceiver)> {
    let name = reservation.room().name().to_string();
    let (outbound_tx, outbound_rx) = outbound_queue(queue_capacity);
    if let Ok(room) = reservation.join(conn, outbound_tx).await {
        return Some((room, outbound_rx));
    }

    let reservation = match hub.admit(&name).await {
        Ok(reservation) => reservation,
        Err(e) => {
            tracing::warn!(conn_id = conn, room = %name, error = %e, "Re-admission failed");
            return None;
        }
    };
    let (outbound_tx, outbound_rx) = outbound_queue(queue_capacity);
    let room = reservation.join(conn, outbound_tx).await.ok()?;
    Some((room, outbound_rx))
}

/// Writer task: drains the outbound queue onto the socket and sends liveness pings.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: OutboundReceiver,
    settings: Arc<ConnectionSettings>,
    conn: ConnectionId,
) {
    let mut ping_timer = interval(settings.ping_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    // Queue closed by the room (leave, eviction or slow-consumer drop)
                    let closing = async {
                        if let Some(notice) = rx.take_close_notice() {
                            ws_sender.send(Message::text(&*notice)).await?;
                        }
                        ws_sender.send(Message::Close(None)).await
                    };
                    let _ = timeout(settings.write_wait, closing).await;
                    break;
                };
                if let Err(e) = write_batch(&mut ws_sender, &mut rx, frame, settings.write_wait).await {
                    tracing::warn!(conn_id = conn, error = %e, "Write error");
                    break;
                }
            }
            _ = ping_timer.tick() => {
                let ping = timeout(settings.write_wait, ws_sender.send(Message::Ping(Bytes::new()))).await;
                if !matches!(ping, Ok(Ok(()))) {
                    tracing::warn!(conn_id = conn, "Ping failed, closing");
                    break;
                }
            }
        }
    }
}

/// Write `first` plus the frames already queued when it was taken, in order,
/// then flush once. The whole batch shares one write deadline; frames that
/// arrive meanwhile wait for the next batch.
async fn write_batch(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    rx: &mut OutboundReceiver,
    first: Frame,
    write_wait: Duration,
) -> Result<(), WriteError> {
    let backlog = rx.len();
    let batch = async {
        ws_sender.feed(Message::text(&*first)).await?;
        for _ in 0..backlog {
            let Ok(next) = rx.try_recv() else {
                break;
            };
            ws_sender.feed(Message::text(&*next)).await?;
        }
        ws_sender.flush().await
    };
    timeout(write_wait, batch)
        .await
        .map_err(|_| WriteError::Timeout)?
        .map_err(WriteError::from)
}
