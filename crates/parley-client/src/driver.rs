//! Driver trait for abstracting the push transport.
//!
//! The [`Driver`] trait decouples the [`crate::Runtime`] from a specific
//! socket implementation. Production uses a WebSocket; simulation uses an
//! in-memory broker. The runtime handles all orchestration either way.

use std::future::Future;

use parley_proto::Frame;

use crate::event::ClientEvent;

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket requested by [`Driver::open`] is open
    Opened,
    /// A frame arrived
    Frame(Frame),
    /// A bare heart-beat EOL arrived
    Heartbeat,
    /// The socket closed, or could not be opened
    Closed {
        /// What happened
        reason: String,
    },
}

impl<I> From<TransportEvent> for ClientEvent<I> {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::Opened => ClientEvent::TransportOpened,
            TransportEvent::Frame(frame) => ClientEvent::FrameReceived(frame),
            TransportEvent::Heartbeat => ClientEvent::HeartbeatReceived,
            TransportEvent::Closed { reason } => ClientEvent::TransportClosed { reason },
        }
    }
}

/// Abstracts the push transport for the runtime.
///
/// # Implementations
///
/// - **Production**: [`crate::transport::WsDriver`], STOMP over WebSocket
/// - **Simulation**: the harness driver, wired to an in-memory broker
///
/// A driver owns at most one socket. Events from a socket that was closed or
/// replaced must not be reported.
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Start opening a socket, replacing any existing one.
    ///
    /// Returns immediately; the outcome arrives through [`Driver::recv`] as
    /// [`TransportEvent::Opened`] or [`TransportEvent::Closed`].
    fn open(&mut self);

    /// Write one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if no socket is open or the write fails.
    fn send_frame(&mut self, frame: &Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Write a bare EOL heart-beat.
    ///
    /// # Errors
    ///
    /// Returns an error if no socket is open or the write fails.
    fn send_heartbeat(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the socket. No further events are reported for it.
    fn close(&mut self, reason: &str);

    /// Wait for the next transport event.
    ///
    /// Must be cancel-safe: the runtime polls it inside `select!`. Returns
    /// `None` once the driver can never produce another event.
    fn recv(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send;
}
