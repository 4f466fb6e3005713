//! Outbound send pipeline.
//!
//! Checks send preconditions and frames the message. The optimistic room
//! list update and its rollback are applied by the caller with the
//! [`crate::room_list::RoomSnapshot`] API; the message itself is not inserted
//! into the cache, the broker's broadcast-back delivers the authoritative
//! copy with its server-assigned id.

use parley_proto::{
    Destination, Frame, RoomId,
    payloads::SendBody,
};

use crate::{connection::ConnectionState, error::SendRefusal, subscription::SubscriptionManager};

/// A validated message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target room
    pub room_id: RoomId,
    /// Content exactly as typed
    pub content: String,
    /// SEND frame to the room's publish destination
    pub frame: Frame,
}

/// Validate a send and build its frame.
///
/// Preconditions, checked in order: the connection is `Connected`, the room
/// has a live subscription (otherwise the broadcast-back would be lost), and
/// the content is non-empty after trimming. The content is sent untrimmed.
///
/// # Errors
///
/// - `SendRefusal::NotConnected`, `NotSubscribed`, `EmptyContent` for the
///   failed precondition
/// - `SendRefusal::Encode` if the message does not fit in one frame
pub fn prepare(
    state: ConnectionState,
    subscriptions: &SubscriptionManager,
    room_id: RoomId,
    content: &str,
) -> Result<OutboundMessage, SendRefusal> {
    if state != ConnectionState::Connected {
        return Err(SendRefusal::NotConnected(state));
    }
    if !subscriptions.is_subscribed(room_id) {
        return Err(SendRefusal::NotSubscribed(room_id));
    }
    if content.trim().is_empty() {
        return Err(SendRefusal::EmptyContent);
    }

    let body = SendBody { content: content.to_string() };
    let frame =
        Frame::send_json(&Destination::RoomSend(room_id), &body).map_err(SendRefusal::Encode)?;

    Ok(OutboundMessage { room_id, content: body.content, frame })
}
