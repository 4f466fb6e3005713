//! JSON bodies carried by MESSAGE and SEND frames.
//!
//! Field names are camelCase on the wire. Optional fields tolerate absence so
//! that older servers which omit them still decode.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Frame, MessageId, RoomId, UserId, errors::Result};

/// A chat message pushed on a room topic.
///
/// Carries only the sender id; name and avatar are resolved client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedMessage {
    /// Server-assigned id, unique within the room
    pub message_id: MessageId,
    /// Room the message belongs to
    pub chat_room_id: RoomId,
    /// Author
    pub sender_id: UserId,
    /// Message text
    pub content: String,
    /// Server send time label
    #[serde(default)]
    pub sent_time: String,
    /// Label the UI should render
    #[serde(default)]
    pub display_time: String,
}

/// Room summary pushed on the room-list queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPreview {
    /// Room being updated
    pub chat_room_id: RoomId,
    /// Preview text
    #[serde(default)]
    pub last_message: String,
    /// Time label for the preview
    #[serde(default)]
    pub last_message_time: String,
    /// Sortable RFC 3339 timestamp, when the server supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
}

/// How loudly an error event should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Transient notification
    #[default]
    Toast,
    /// Blocking dialog
    Modal,
    /// Attention-grabbing alert
    Alert,
}

/// Error event pushed on the personal error queue.
///
/// Every field is optional; an empty object is a valid (if unhelpful) event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorEvent {
    /// Machine-readable code
    pub code: Option<String>,
    /// Human-readable description
    pub message: Option<String>,
    /// Room the error concerns
    pub room_id: Option<RoomId>,
    /// Suggested client reaction (for example `"close"`)
    pub action: Option<String>,
    /// Presentation hint
    pub severity: Option<Severity>,
}

/// Body of a SEND frame to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBody {
    /// Message text, sent as typed
    pub content: String,
}

/// Deserialize a frame body as JSON.
///
/// # Errors
///
/// - `ProtocolError::Json` if the body does not match `T`
pub fn decode_json<T: DeserializeOwned>(frame: &Frame) -> Result<T> {
    Ok(serde_json::from_slice(&frame.body)?)
}
