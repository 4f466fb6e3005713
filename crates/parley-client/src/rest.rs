//! REST collaborator boundary.

use std::future::Future;

use parley_core::{ChatMessage, ChatRoom, Participant};
use parley_proto::{RoomId, UserId};

use crate::error::RestError;

/// Request/response calls the client depends on.
///
/// Cloned into a task per request; implementations share their connection
/// pool between clones.
pub trait RestApi: Clone + Send + Sync + 'static {
    /// Rooms the local user belongs to.
    fn fetch_rooms(&self) -> impl Future<Output = Result<Vec<ChatRoom>, RestError>> + Send;

    /// Message history of `room_id`. Also marks the room read.
    fn fetch_history(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, RestError>> + Send;

    /// Find or create the personal room with `user_id`.
    fn start_personal_room(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<RoomId, RestError>> + Send;

    /// Profile of `user_id`.
    fn fetch_user(&self, user_id: UserId)
    -> impl Future<Output = Result<Participant, RestError>> + Send;
}
