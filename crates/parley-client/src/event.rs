//! Client events, actions and notifications.

use parley_core::{
    ChatMessage, ChatRoom, ConnectionState, Credential, ErrorNotice, HistoryTicket, Participant,
    RoomsTicket,
};
use parley_proto::{Frame, RoomId, UserId};

/// Correlates a [`ClientAction::Publish`] with its completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendToken(pub u64);

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Forwarding transport events (socket opened/closed, frames, heart-beats)
/// - Completing the REST requests the client asked for
/// - Driving time forward via ticks
/// - Forwarding user intents (switch room, send message, focus)
///
/// Generic over `I` (Instant type) to support both production
/// (`std::time::Instant`) and simulation (virtual instant) environments.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Start a session with the given credential.
    Connect {
        /// Bearer credential, if the server requires one
        credential: Option<Credential>,
    },

    /// End the session and stop reconnecting.
    Disconnect,

    /// The driver finished opening the socket.
    TransportOpened,

    /// The socket closed.
    TransportClosed {
        /// What the driver observed
        reason: String,
    },

    /// A frame arrived from the server.
    FrameReceived(Frame),

    /// A bare heart-beat EOL arrived from the server.
    HeartbeatReceived,

    /// Time tick for timeouts, heart-beats, retries and periodic refresh.
    Tick {
        /// Current time from the environment
        now: I,
    },

    /// The user opened a room, or closed the current one (`None`).
    SetActiveRoom {
        /// Room to show
        room_id: Option<RoomId>,
    },

    /// The user sent a message.
    SendMessage {
        /// Target room
        room_id: RoomId,
        /// Text as typed
        content: String,
    },

    /// The transport wrote a published frame.
    PublishCompleted {
        /// Token from [`ClientAction::Publish`]
        token: SendToken,
    },

    /// The transport failed to write a published frame.
    PublishFailed {
        /// Token from [`ClientAction::Publish`]
        token: SendToken,
        /// Transport error
        reason: String,
    },

    /// History fetch completed.
    HistoryLoaded {
        /// Ticket from [`ClientAction::FetchHistory`]
        ticket: HistoryTicket,
        /// Messages in any order
        messages: Vec<ChatMessage>,
    },

    /// History fetch failed.
    HistoryFailed {
        /// Ticket from [`ClientAction::FetchHistory`]
        ticket: HistoryTicket,
        /// REST error
        reason: String,
    },

    /// Room list fetch completed.
    RoomsLoaded {
        /// Ticket from [`ClientAction::FetchRooms`]
        ticket: RoomsTicket,
        /// Rooms in server order
        rooms: Vec<ChatRoom>,
    },

    /// Room list fetch failed.
    RoomsFailed {
        /// Ticket from [`ClientAction::FetchRooms`]
        ticket: RoomsTicket,
        /// REST error
        reason: String,
    },

    /// The chat view gained or lost focus.
    FocusChanged {
        /// New focus state
        focused: bool,
    },

    /// The user asked to chat with `user_id` one-to-one.
    StartPersonalRoom {
        /// Other party
        user_id: UserId,
    },

    /// The personal room exists (created or found).
    PersonalRoomReady {
        /// Room to open
        room_id: RoomId,
    },

    /// Personal room provisioning failed.
    PersonalRoomFailed {
        /// Other party
        user_id: UserId,
        /// REST error
        reason: String,
    },

    /// Profile lookup for an unknown sender completed.
    UserLoaded {
        /// Room the sender appeared in
        room_id: RoomId,
        /// Resolved identity
        participant: Participant,
    },

    /// Profile lookup for an unknown sender failed.
    UserFailed {
        /// Room the sender appeared in
        room_id: RoomId,
        /// Unresolved user
        user_id: UserId,
        /// REST error
        reason: String,
    },
}

/// Actions the client asks the caller to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open a new socket to the server.
    Open,

    /// Write this frame.
    Send(Frame),

    /// Write a bare EOL heart-beat.
    SendHeartbeat,

    /// Close the socket.
    Close {
        /// Reason for closing
        reason: String,
    },

    /// Write a user message and report the outcome with
    /// [`ClientEvent::PublishCompleted`] or [`ClientEvent::PublishFailed`].
    Publish {
        /// Completion token
        token: SendToken,
        /// SEND frame
        frame: Frame,
    },

    /// Fetch history; answer with [`ClientEvent::HistoryLoaded`] or
    /// [`ClientEvent::HistoryFailed`].
    FetchHistory {
        /// Freshness ticket to echo back
        ticket: HistoryTicket,
    },

    /// Fetch the room list; answer with [`ClientEvent::RoomsLoaded`] or
    /// [`ClientEvent::RoomsFailed`].
    FetchRooms {
        /// Freshness ticket to echo back
        ticket: RoomsTicket,
    },

    /// Find or create the personal room with `user_id`.
    StartPersonalRoom {
        /// Other party
        user_id: UserId,
    },

    /// Look up the profile of a sender the room has no identity for.
    FetchUser {
        /// Room the sender appeared in
        room_id: RoomId,
        /// User to look up
        user_id: UserId,
    },

    /// Tell observers something changed.
    Notify(Notification),
}

/// Observable changes, for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Connection state changed
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },

    /// The session ended. Once per disconnect cycle.
    Disconnected {
        /// What ended it
        reason: String,
    },

    /// The credential was rejected; the user must log in again.
    AuthFailed {
        /// Server-supplied reason
        reason: String,
    },

    /// Messages of a room changed
    MessagesChanged {
        /// Affected room
        room_id: RoomId,
    },

    /// The room list changed
    RoomsChanged,

    /// The active room changed
    ActiveRoomChanged {
        /// New active room
        room_id: Option<RoomId>,
    },

    /// The server pushed an error event
    ServerError(ErrorNotice),

    /// A publish failed after the optimistic update was applied
    SendFailed {
        /// Target room
        room_id: RoomId,
        /// Transport error
        reason: String,
    },

    /// Transient user-facing message
    Toast(String),
}
