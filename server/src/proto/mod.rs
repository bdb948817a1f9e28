//! JSON wire envelope shared by the client and the server.
//!
//! Every frame on the socket is one `Envelope` object. The `type` tag is
//! drawn from a closed set; tags outside that set decode to
//! `MessageType::Unknown` so the reader can log and skip them instead of
//! treating them as malformed.

use serde::{Deserialize, Serialize};

/// Display name used for server-generated chat lines (joins and departures).
pub const SYSTEM_USERNAME: &str = "System";

/// Text of the error frame sent to every member of a room retired for inactivity.
pub const ROOM_CLOSED_TEXT: &str = "Room closed due to inactivity.";

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    SetUsername,
    Chat,
    Typing,
    GetRoomList,
    RoomList,
    Error,
    RoomAdded,
    #[serde(other)]
    Unknown,
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Room names carried by `roomList` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
}

impl Envelope {
    fn bare(kind: MessageType) -> Self {
        Self {
            kind,
            username: None,
            content: None,
            users: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::bare(MessageType::Error)
        }
    }

    /// A chat line attributed to the server itself.
    pub fn system(content: impl Into<String>) -> Self {
        Self::chat(SYSTEM_USERNAME, content)
    }

    pub fn chat(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            content: Some(content.into()),
            ..Self::bare(MessageType::Chat)
        }
    }

    pub fn typing(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::bare(MessageType::Typing)
        }
    }

    pub fn room_list(rooms: Vec<String>) -> Self {
        Self {
            users: Some(rooms),
            ..Self::bare(MessageType::RoomList)
        }
    }

    pub fn room_added(room: impl Into<String>) -> Self {
        Self {
            content: Some(room.into()),
            ..Self::bare(MessageType::RoomAdded)
        }
    }

    /// Parse one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize into the shared frame representation handed to outbound queues.
    pub fn to_frame(&self) -> Frame {
        // Envelope holds only strings and string lists, so serialization cannot fail.
        match serde_json::to_string(self) {
            Ok(json) => Frame::from(json),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize envelope");
                Frame::from("{}")
            }
        }
    }
}

/// A serialized frame. Shared by reference count so one broadcast allocates once.
pub type Frame = std::sync::Arc<str>;
