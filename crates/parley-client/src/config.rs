//! Client configuration.

use std::time::Duration;

use parley_core::{
    ConnectionConfig, room_list::DEFAULT_ROOM_REFRESH_INTERVAL,
    throttle::DEFAULT_READ_SYNC_INTERVAL,
};
use parley_proto::UserId;

/// How often the runtime ticks the client.
///
/// Must stay well below the heart-beat interval so outgoing beats are not
/// late.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The local user. Pushes from this user do not trigger a read sync.
    pub user_id: UserId,
    /// Session parameters
    pub connection: ConnectionConfig,
    /// Minimum spacing between read-state refreshes caused by pushes
    pub read_sync_interval: Duration,
    /// Periodic room list refresh interval while focused
    pub room_refresh_interval: Duration,
    /// Subscribe to the personal room-list queue in addition to polling
    pub subscribe_room_updates: bool,
    /// Runtime tick period
    pub tick_interval: Duration,
}

impl ClientConfig {
    /// Default configuration for `user_id`.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            connection: ConnectionConfig::default(),
            read_sync_interval: DEFAULT_READ_SYNC_INTERVAL,
            room_refresh_interval: DEFAULT_ROOM_REFRESH_INTERVAL,
            subscribe_room_updates: false,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}
