//! Server-pushed error events.
//!
//! The personal error queue is a [`StandingChannel`] re-established on every
//! connect. Each event becomes an [`ErrorNotice`]: a toast line for the user
//! plus the decoded event for the caller's handler.

use parley_proto::{
    Destination, Frame,
    payloads::{self, ErrorEvent, Severity},
};
use tracing::{debug, warn};

use crate::subscription::{StandingChannel, SubscriptionAction};

/// Subscription id of the personal error queue.
pub const ERROR_SUBSCRIPTION_ID: &str = "errors";

/// Toast shown when an event carries no usable message.
pub const FALLBACK_TOAST: &str = "Something went wrong in chat.";

/// A decoded server error, ready to surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    /// Text for the transient notification
    pub toast: String,
    /// Decoded event. Default when the body did not parse.
    pub event: ErrorEvent,
}

impl ErrorNotice {
    /// Check if the server asked the client to close the affected view.
    pub fn closes_view(&self) -> bool {
        self.event.action.as_deref() == Some("close")
            || matches!(self.event.severity, Some(Severity::Modal))
    }
}

/// Standing subscription to the personal error queue.
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    channel: StandingChannel,
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorChannel {
    /// Create the channel; it subscribes on the first connect.
    pub fn new() -> Self {
        Self { channel: StandingChannel::new(ERROR_SUBSCRIPTION_ID, Destination::ErrorQueue, true) }
    }

    /// Check if the channel is subscribed.
    pub fn is_live(&self) -> bool {
        self.channel.is_live()
    }

    /// Check if a MESSAGE frame arrived on this channel.
    pub fn owns(&self, subscription_id: &str) -> bool {
        self.channel.owns(subscription_id)
    }

    /// Session established.
    pub fn on_connected(&mut self) -> Option<SubscriptionAction> {
        self.channel.on_connected()
    }

    /// Session lost.
    pub fn on_disconnected(&mut self) {
        self.channel.on_disconnected();
    }

    /// Decode an error event frame.
    ///
    /// Never fails: a body that does not parse still produces a generic toast.
    pub fn handle_frame(&self, frame: &Frame) -> ErrorNotice {
        let event = match payloads::decode_json::<ErrorEvent>(frame) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "undecodable error event");
                ErrorEvent::default()
            },
        };

        let toast = event
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(FALLBACK_TOAST)
            .to_string();

        debug!(code = ?event.code, room = ?event.room_id, "server error event");
        ErrorNotice { toast, event }
    }
}
