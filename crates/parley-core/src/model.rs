//! Chat domain model.
//!
//! Field names follow the REST collaborator's camelCase JSON so the same
//! types decode straight from response envelopes.

use chrono::{DateTime, Utc};
use parley_proto::{MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::time;

/// Kind of chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomKind {
    /// One-to-one conversation
    Personal,
    /// Room shared by every member of a project
    ProjectGroup,
    /// Room attached to a single task
    TaskGroup,
}

/// Identity of a room participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// User id
    pub user_id: UserId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Avatar URL
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

/// A chat room as shown in the room list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    /// Server-assigned id
    #[serde(rename = "chatRoomId")]
    pub room_id: RoomId,
    /// Display name
    #[serde(rename = "roomName", default)]
    pub name: String,
    /// Room kind
    #[serde(rename = "chatType")]
    pub kind: RoomKind,
    /// Members in server order
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Preview text
    #[serde(default)]
    pub last_message: String,
    /// Preview time label as rendered
    #[serde(default)]
    pub last_message_time: String,
    /// Sortable last-activity timestamp. `None` sorts as oldest.
    #[serde(default, deserialize_with = "time::deserialize_optional")]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Unread messages for the local user
    #[serde(default)]
    pub unread_count: u32,
    /// Task the room belongs to, for task rooms
    #[serde(default)]
    pub related_task_id: Option<u64>,
}

/// Author of a message.
///
/// Pushed events carry only the id; `name` and `profile_image_url` stay empty
/// until history supplies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    /// User id
    pub user_id: UserId,
    /// Display name. Empty for a placeholder.
    #[serde(default)]
    pub name: String,
    /// Avatar URL
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

impl Sender {
    /// Sender known only by id.
    pub fn placeholder(user_id: UserId) -> Self {
        Self { user_id, name: String::new(), profile_image_url: None }
    }

    /// Check if this sender still lacks display fields.
    pub fn is_placeholder(&self) -> bool {
        self.name.is_empty() && self.profile_image_url.is_none()
    }
}

impl From<Participant> for Sender {
    fn from(p: Participant) -> Self {
        Self { user_id: p.user_id, name: p.name, profile_image_url: p.profile_image_url }
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned id; ordering key within the room
    pub message_id: MessageId,
    /// Room the message belongs to. History responses may omit it.
    #[serde(rename = "chatRoomId", default)]
    pub room_id: RoomId,
    /// Author
    pub sender: Sender,
    /// Message text
    pub content: String,
    /// Server send time label
    #[serde(default)]
    pub sent_time: String,
    /// Label the UI should render
    #[serde(default)]
    pub display_time: String,
}
