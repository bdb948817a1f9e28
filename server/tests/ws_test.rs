//! Integration tests for WebSocket chat: usernames, broadcast, typing, departures and liveness.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use roomchat_server::chat::Hub;
use roomchat_server::config::{ConnectionSettings, RoomSettings};
use roomchat_server::state::AppState;

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Helper: start the server on a random port and return its address.
async fn start_test_server(connection: ConnectionSettings) -> SocketAddr {
    let state = AppState::new(Hub::new(RoomSettings::default()), connection);
    let app = roomchat_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn connect(addr: SocketAddr, room: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?room={}", addr, room);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

async fn send_json(write: &mut WsWrite, value: Value) {
    write
        .send(Message::text(value.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Next chat/typing/error frame, skipping room directory updates and control
/// frames. Returns None once the server closes the socket.
async fn next_frame(read: &mut WsRead) -> Option<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), read.next())
            .await
            .expect("Timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == "roomList" || value["type"] == "roomAdded" {
                    continue;
                }
                return Some(value);
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(other)) => panic!("Unexpected message: {:?}", other),
        }
    }
}

/// Claim `username` and wait for our own join announcement, which proves the
/// connection is a registered member of the room.
async fn join_as(write: &mut WsWrite, read: &mut WsRead, username: &str) {
    send_json(write, json!({"type": "setUsername", "username": username})).await;
    let expected = format!("{} has joined the chat.", username);
    loop {
        let frame = next_frame(read).await.expect("Socket closed while joining");
        if frame["username"] == "System" && frame["content"] == expected.as_str() {
            return;
        }
    }
}

#[tokio::test]
async fn test_chat_is_broadcast_to_room() {
    let addr = start_test_server(ConnectionSettings::default()).await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "alice").await;
    let (mut b_write, mut b_read) = connect(addr, "lobby").await;
    join_as(&mut b_write, &mut b_read, "bob").await;

    // Alice also sees Bob arrive
    let frame = next_frame(&mut a_read).await.unwrap();
    assert_eq!(frame, json!({"type": "chat", "username": "System", "content": "bob has joined the chat."}));

    send_json(&mut a_write, json!({"type": "chat", "content": "hi bob"})).await;

    let frame = next_frame(&mut b_read).await.unwrap();
    assert_eq!(frame, json!({"type": "chat", "username": "alice", "content": "hi bob"}));
    // The sender gets its own message back
    let frame = next_frame(&mut a_read).await.unwrap();
    assert_eq!(frame["content"], "hi bob");
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let addr = start_test_server(ConnectionSettings::default()).await;

    let (mut a_write, mut a_read) = connect(addr, "red").await;
    join_as(&mut a_write, &mut a_read, "alice").await;
    let (mut b_write, mut b_read) = connect(addr, "blue").await;
    join_as(&mut b_write, &mut b_read, "alice").await;

    send_json(&mut b_write, json!({"type": "chat", "content": "blue only"})).await;
    assert_eq!(next_frame(&mut b_read).await.unwrap()["content"], "blue only");

    send_json(&mut a_write, json!({"type": "chat", "content": "red only"})).await;
    assert_eq!(next_frame(&mut a_read).await.unwrap()["content"], "red only");
}

#[tokio::test]
async fn test_invalid_username_rejected() {
    let addr = start_test_server(ConnectionSettings::default()).await;
    let (mut write, mut read) = connect(addr, "lobby").await;

    for bad in ["", "has space", "abcdefghijklmnopqrstu"] {
        send_json(&mut write, json!({"type": "setUsername", "username": bad})).await;
        let frame = next_frame(&mut read).await.unwrap();
        assert_eq!(
            frame,
            json!({"type": "error", "content": "Invalid username. Use 1-20 alphanumeric characters or underscores."})
        );
    }

    // Still connected and able to pick a valid name
    join_as(&mut write, &mut read, "abcdefghijklmnopqrst").await;
}

#[tokio::test]
async fn test_duplicate_username_rejected() {
    let addr = start_test_server(ConnectionSettings::default()).await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "alice").await;
    let (mut b_write, mut b_read) = connect(addr, "lobby").await;

    send_json(&mut b_write, json!({"type": "setUsername", "username": "alice"})).await;
    let frame = next_frame(&mut b_read).await.unwrap();
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["content"], "Username already taken, please choose another one.");

    join_as(&mut b_write, &mut b_read, "alice_2").await;

    // The rejection went only to Bob; Alice's next frame is the successful join
    let frame = next_frame(&mut a_read).await.unwrap();
    assert_eq!(frame["content"], "alice_2 has joined the chat.");
}

#[tokio::test]
async fn test_rename_rejected() {
    let addr = start_test_server(ConnectionSettings::default()).await;
    let (mut write, mut read) = connect(addr, "lobby").await;
    join_as(&mut write, &mut read, "alice").await;

    send_json(&mut write, json!({"type": "setUsername", "username": "alicia"})).await;
    let frame = next_frame(&mut read).await.unwrap();
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["content"], "You already have a username in this room.");
}

#[tokio::test]
async fn test_unnamed_chat_and_typing_ignored() {
    let addr = start_test_server(ConnectionSettings::default()).await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "alice").await;
    let (mut b_write, _b_read) = connect(addr, "lobby").await;

    send_json(&mut b_write, json!({"type": "chat", "content": "anonymous"})).await;
    send_json(&mut b_write, json!({"type": "typing"})).await;
    // Malformed and unknown frames are skipped without closing the socket
    b_write.send(Message::text("{not json")).await.unwrap();
    send_json(&mut b_write, json!({"type": "shout", "content": "x"})).await;

    send_json(&mut a_write, json!({"type": "chat", "content": "named"})).await;
    let frame = next_frame(&mut a_read).await.unwrap();
    assert_eq!(frame, json!({"type": "chat", "username": "alice", "content": "named"}));
}

#[tokio::test]
async fn test_typing_uses_registered_name() {
    let addr = start_test_server(ConnectionSettings::default()).await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "alice").await;
    let (mut b_write, mut b_read) = connect(addr, "lobby").await;
    join_as(&mut b_write, &mut b_read, "bob").await;

    // A client-supplied name is ignored
    send_json(&mut a_write, json!({"type": "typing", "username": "mallory"})).await;

    let frame = next_frame(&mut b_read).await.unwrap();
    assert_eq!(frame, json!({"type": "typing", "username": "alice"}));
}

#[tokio::test]
async fn test_departure_announced_and_name_released() {
    let addr = start_test_server(ConnectionSettings::default()).await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "alice").await;
    let (mut b_write, mut b_read) = connect(addr, "lobby").await;
    join_as(&mut b_write, &mut b_read, "bob").await;
    assert_eq!(next_frame(&mut a_read).await.unwrap()["content"], "bob has joined the chat.");

    b_write.send(Message::Close(None)).await.unwrap();
    drop(b_write);
    drop(b_read);

    let frame = next_frame(&mut a_read).await.unwrap();
    assert_eq!(frame, json!({"type": "chat", "username": "System", "content": "bob has left the chat."}));

    // The name can be claimed again
    let (mut c_write, mut c_read) = connect(addr, "lobby").await;
    join_as(&mut c_write, &mut c_read, "bob").await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let addr = start_test_server(ConnectionSettings::default()).await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "alice").await;
    let (mut b_write, mut b_read) = connect(addr, "lobby").await;
    join_as(&mut b_write, &mut b_read, "bob").await;
    assert_eq!(next_frame(&mut a_read).await.unwrap()["content"], "bob has joined the chat.");

    let huge = "x".repeat(2048);
    let _ = b_write
        .send(Message::text(json!({"type": "chat", "content": huge}).to_string()))
        .await;

    let frame = next_frame(&mut a_read).await.unwrap();
    assert_eq!(frame["content"], "bob has left the chat.");
    assert!(next_frame(&mut b_read).await.is_none());
}

#[tokio::test]
async fn test_client_ping_answered() {
    let addr = start_test_server(ConnectionSettings::default()).await;
    let (mut write, mut read) = connect(addr, "lobby").await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected pong within timeout");
        match msg {
            Some(Ok(Message::Pong(data))) => {
                assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
                break;
            }
            // Room directory updates may arrive first
            Some(Ok(Message::Text(_))) => continue,
            other => panic!("Expected Pong message, got: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_silent_client_dropped_after_read_deadline() {
    let addr = start_test_server(ConnectionSettings {
        pong_wait: Duration::from_secs(1),
        ping_interval: Duration::from_millis(300),
        ..ConnectionSettings::default()
    })
    .await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "awake").await;
    let (mut b_write, mut b_read) = connect(addr, "lobby").await;
    join_as(&mut b_write, &mut b_read, "sleepy").await;

    // Bob stops reading, so his client never answers pings. Alice keeps
    // reading, and her client answers each ping as it arrives.
    let mut left = false;
    for _ in 0..10 {
        let Some(frame) = next_frame(&mut a_read).await else {
            break;
        };
        if frame["content"] == "sleepy has left the chat." {
            left = true;
            break;
        }
    }
    assert!(left, "Silent client was not removed");
    drop((b_write, b_read));
}

#[tokio::test]
async fn test_burst_delivered_in_order() {
    let addr = start_test_server(ConnectionSettings::default()).await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "alice").await;
    let (mut b_write, mut b_read) = connect(addr, "lobby").await;
    join_as(&mut b_write, &mut b_read, "bob").await;

    const BURST: usize = 50;
    for i in 0..BURST {
        send_json(&mut a_write, json!({"type": "chat", "content": format!("line {}", i)})).await;
    }

    for i in 0..BURST {
        let frame = next_frame(&mut b_read).await.unwrap();
        assert_eq!(frame["username"], "alice");
        assert_eq!(frame["content"], format!("line {}", i).as_str());
    }
}

#[tokio::test]
async fn test_stalled_reader_dropped_while_others_keep_receiving() {
    let addr = start_test_server(ConnectionSettings {
        outbound_queue_capacity: 4,
        max_frame_bytes: 128 * 1024,
        write_wait: Duration::from_secs(1),
        ..ConnectionSettings::default()
    })
    .await;

    let (mut a_write, mut a_read) = connect(addr, "lobby").await;
    join_as(&mut a_write, &mut a_read, "active").await;
    let (mut b_write, mut b_read) = connect(addr, "lobby").await;
    join_as(&mut b_write, &mut b_read, "stalled").await;

    // Bob stops reading. Alice sends large lines one at a time, waiting for
    // each echo, until far more than the socket buffers can hold has been
    // fanned out.
    let padding = "x".repeat(60 * 1024);
    for i in 0..400 {
        let content = format!("{}:{}", i, padding);
        send_json(&mut a_write, json!({"type": "chat", "content": content})).await;
        loop {
            let frame = next_frame(&mut a_read).await.expect("Active client was dropped");
            if frame["username"] == "active" && frame["content"] == content.as_str() {
                break;
            }
        }
    }

    // The stalled client is no longer a member, so its name is free again
    let (mut c_write, mut c_read) = connect(addr, "lobby").await;
    send_json(&mut c_write, json!({"type": "setUsername", "username": "stalled"})).await;
    let frame = next_frame(&mut c_read).await.unwrap();
    assert_eq!(frame["content"], "stalled has joined the chat.");

    loop {
        let frame = next_frame(&mut a_read).await.unwrap();
        if frame["content"] == "stalled has joined the chat." {
            break;
        }
    }
    drop((b_write, b_read));
}
