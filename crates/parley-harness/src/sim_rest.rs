//! REST collaborator backed by the simulated server.

use parley_client::{RestApi, RestError};
use parley_core::{ChatMessage, ChatRoom, Participant};
use parley_proto::{RoomId, UserId};

use crate::sim_server::{SharedSimServer, lock};

/// [`RestApi`] answering from a [`SimServer`](crate::SimServer) as `user_id`.
#[derive(Clone)]
pub struct SimRest {
    server: SharedSimServer,
    user_id: UserId,
}

impl SimRest {
    /// REST client for `user_id`.
    pub fn new(server: SharedSimServer, user_id: UserId) -> Self {
        Self { server, user_id }
    }
}

impl RestApi for SimRest {
    async fn fetch_rooms(&self) -> Result<Vec<ChatRoom>, RestError> {
        lock(&self.server).rest_rooms(self.user_id)
    }

    async fn fetch_history(&self, room_id: RoomId) -> Result<Vec<ChatMessage>, RestError> {
        lock(&self.server).rest_history(self.user_id, room_id)
    }

    async fn start_personal_room(&self, user_id: UserId) -> Result<RoomId, RestError> {
        lock(&self.server).rest_personal_room(self.user_id, user_id)
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<Participant, RestError> {
        lock(&self.server).rest_user(user_id)
    }
}
