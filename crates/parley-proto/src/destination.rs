//! Push transport destinations.

use std::{fmt, str::FromStr};

use crate::{RoomId, errors::ProtocolError};

const ROOM_TOPIC_PREFIX: &str = "/topic/chat/rooms/";
const ROOM_SEND_PREFIX: &str = "/app/chat/rooms/";
const ERROR_QUEUE: &str = "/user/queue/errors";
const ROOM_LIST_QUEUE: &str = "/user/queue/chat/rooms";

/// A topic or queue on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Broadcast topic for one room's messages
    RoomTopic(RoomId),
    /// Publish destination for one room
    RoomSend(RoomId),
    /// Personal queue for server-pushed error events
    ErrorQueue,
    /// Personal queue for room preview updates
    RoomListQueue,
}

impl Destination {
    /// Room the destination is bound to, if any.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::RoomTopic(id) | Self::RoomSend(id) => Some(*id),
            Self::ErrorQueue | Self::RoomListQueue => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoomTopic(id) => write!(f, "{ROOM_TOPIC_PREFIX}{id}"),
            Self::RoomSend(id) => write!(f, "{ROOM_SEND_PREFIX}{id}"),
            Self::ErrorQueue => f.write_str(ERROR_QUEUE),
            Self::RoomListQueue => f.write_str(ROOM_LIST_QUEUE),
        }
    }
}

impl FromStr for Destination {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidDestination(s.to_string());

        if s == ERROR_QUEUE {
            return Ok(Self::ErrorQueue);
        }
        if s == ROOM_LIST_QUEUE {
            return Ok(Self::RoomListQueue);
        }
        if let Some(id) = s.strip_prefix(ROOM_TOPIC_PREFIX) {
            return id.parse().map(Self::RoomTopic).map_err(|_| invalid());
        }
        if let Some(id) = s.strip_prefix(ROOM_SEND_PREFIX) {
            return id.parse().map(Self::RoomSend).map_err(|_| invalid());
        }

        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_variant() {
        for dest in [
            Destination::RoomTopic(7),
            Destination::RoomSend(42),
            Destination::ErrorQueue,
            Destination::RoomListQueue,
        ] {
            assert_eq!(dest.to_string().parse::<Destination>(), Ok(dest));
        }
    }

    #[test]
    fn rejects_unknown_paths() {
        assert!("/topic/chat/rooms/abc".parse::<Destination>().is_err());
        assert!("/topic/other".parse::<Destination>().is_err());
        assert!("".parse::<Destination>().is_err());
    }

    #[test]
    fn room_id_only_for_room_destinations() {
        assert_eq!(Destination::RoomTopic(3).room_id(), Some(3));
        assert_eq!(Destination::ErrorQueue.room_id(), None);
    }
}
