//! HTTP implementation of the REST collaborator.

use parley_core::{ChatMessage, ChatRoom, Participant};
use parley_proto::{RoomId, UserId};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::{error::RestError, rest::RestApi};

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

/// Room reference returned by personal room provisioning.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomRef {
    chat_room_id: RoomId,
}

/// [`RestApi`] over HTTPS with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpRestApi {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HttpRestApi {
    /// Client for the API at `base` (for example `https://api.example.com`).
    pub fn new(base: &str, token: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), base: base.trim_end_matches('/').to_string(), token }
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T, RestError> {
        let url = format!("{}{path}", self.base);
        debug!(%method, %url, "rest request");

        let mut request = self.http.request(method, &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| RestError::Http(e.to_string()))?;
        let status = response.status();
        let envelope: Envelope<T> = match response.json().await {
            Ok(envelope) => envelope,
            Err(error) if status.is_success() => return Err(RestError::Decode(error.to_string())),
            Err(_) => return Err(api_error(status, None)),
        };

        if !status.is_success() {
            return Err(api_error(status, envelope.message));
        }
        envelope.data.ok_or_else(|| RestError::Decode(format!("{path}: response has no data")))
    }
}

fn api_error(status: StatusCode, message: Option<String>) -> RestError {
    RestError::Api {
        status: status.as_u16(),
        message: message
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    }
}

impl RestApi for HttpRestApi {
    async fn fetch_rooms(&self) -> Result<Vec<ChatRoom>, RestError> {
        self.call(Method::GET, "/api/chat/rooms").await
    }

    async fn fetch_history(&self, room_id: RoomId) -> Result<Vec<ChatMessage>, RestError> {
        self.call(Method::GET, &format!("/api/chat/rooms/{room_id}/messages")).await
    }

    async fn start_personal_room(&self, user_id: UserId) -> Result<RoomId, RestError> {
        let room: RoomRef =
            self.call(Method::POST, &format!("/api/chat/rooms/personal/{user_id}")).await?;
        Ok(room.chat_room_id)
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<Participant, RestError> {
        self.call(Method::GET, &format!("/api/users/{user_id}")).await
    }
}
