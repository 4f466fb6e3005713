//! WebSocket transport for the client.
//!
//! Provides [`WsDriver`], which carries STOMP frames one per WebSocket text
//! message. This is a thin layer that only moves bytes; session logic stays
//! in the Sans-IO [`crate::Client`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_proto::{Frame, ProtocolError};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::driver::{Driver, TransportEvent};

/// Path of the STOMP endpoint on the chat server.
pub const WS_PATH: &str = "/ws/chat";

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No socket is open.
    #[error("not connected")]
    NotConnected,

    /// Frame could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] ProtocolError),

    /// Write failed.
    #[error("stream error: {0}")]
    Stream(String),
}

/// A queued write and the slot that receives its outcome.
type Write = (Message, oneshot::Sender<Result<(), String>>);

/// Handle to the live socket task.
struct Socket {
    writes: mpsc::UnboundedSender<Write>,
    task: tokio::task::AbortHandle,
}

/// [`Driver`] over a WebSocket.
///
/// Each [`Driver::open`] spawns a task that owns one socket. Events are
/// tagged with the socket's epoch so nothing from a replaced or closed socket
/// reaches the runtime.
pub struct WsDriver {
    url: String,
    connect_timeout: Duration,
    epoch: u64,
    socket: Option<Socket>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
}

impl WsDriver {
    /// Driver for the server at `server` (for example `wss://chat.example.com`).
    pub fn new(server: &str, connect_timeout: Duration) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            url: format!("{}{WS_PATH}", server.trim_end_matches('/')),
            connect_timeout,
            epoch: 0,
            socket: None,
            events_tx,
            events,
        }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn write(&mut self, message: Message) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        let (ack, outcome) = oneshot::channel();
        socket.writes.send((message, ack)).map_err(|_| TransportError::NotConnected)?;

        match outcome.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(TransportError::Stream(error)),
            Err(_) => Err(TransportError::NotConnected),
        }
    }
}

impl Drop for WsDriver {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.task.abort();
        }
    }
}

impl Driver for WsDriver {
    type Error = TransportError;

    fn open(&mut self) {
        if let Some(old) = self.socket.take() {
            old.task.abort();
        }

        self.epoch += 1;
        let (writes, pending) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_socket(
            self.url.clone(),
            self.connect_timeout,
            self.epoch,
            pending,
            self.events_tx.clone(),
        ));

        debug!(epoch = self.epoch, url = %self.url, "opening socket");
        self.socket = Some(Socket { writes, task: handle.abort_handle() });
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame.encode()?;
        let message = match String::from_utf8(bytes) {
            Ok(text) => Message::Text(text),
            Err(error) => Message::Binary(error.into_bytes()),
        };
        self.write(message).await
    }

    async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        self.write(Message::Text("\n".to_string())).await
    }

    fn close(&mut self, reason: &str) {
        let Some(socket) = self.socket.take() else {
            return;
        };

        debug!(epoch = self.epoch, reason, "closing socket");
        self.epoch += 1;
        let (ack, _) = oneshot::channel();
        if socket.writes.send((Message::Close(None), ack)).is_err() {
            socket.task.abort();
        }
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            let (epoch, event) = self.events.recv().await?;
            if epoch == self.epoch {
                return Some(event);
            }
            debug!(epoch, current = self.epoch, "dropping event from old socket");
        }
    }
}

/// Own one socket until it closes or the driver closes it.
async fn run_socket(
    url: String,
    connect_timeout: Duration,
    epoch: u64,
    mut writes: mpsc::UnboundedReceiver<Write>,
    events: mpsc::UnboundedSender<(u64, TransportEvent)>,
) {
    let report = |event: TransportEvent| {
        if events.send((epoch, event)).is_err() {
            debug!(epoch, "driver gone, dropping transport event");
        }
    };
    let closed = |reason: String| TransportEvent::Closed { reason };

    let stream = match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(error)) => {
            warn!(%error, %url, "websocket connect failed");
            report(closed(format!("connect failed: {error}")));
            return;
        },
        Err(_) => {
            warn!(%url, ?connect_timeout, "websocket connect timed out");
            report(closed("connect timed out".to_string()));
            return;
        },
    };

    info!(epoch, %url, "socket open");
    report(TransportEvent::Opened);
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            write = writes.recv() => {
                let Some((message, ack)) = write else {
                    let _ = sink.close().await;
                    return;
                };
                let closing = matches!(message, Message::Close(_));
                let outcome = sink.send(message).await.map_err(|e| e.to_string());
                let failed = outcome.clone().err();
                let _ = ack.send(outcome);

                if let Some(error) = failed {
                    report(closed(format!("write failed: {error}")));
                    return;
                }
                if closing {
                    return;
                }
            },
            incoming = source.next() => {
                let payload = match incoming {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(close))) => {
                        let reason = close.map_or_else(
                            || "closed by server".to_string(),
                            |c| format!("closed by server: {} {}", c.code, c.reason),
                        );
                        report(closed(reason));
                        return;
                    },
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => {
                        report(closed(format!("read failed: {error}")));
                        return;
                    },
                    None => {
                        report(closed("socket ended".to_string()));
                        return;
                    },
                };

                match Frame::decode_stream(&payload) {
                    Ok(frames) if frames.is_empty() => report(TransportEvent::Heartbeat),
                    Ok(frames) => {
                        for frame in frames {
                            report(TransportEvent::Frame(frame));
                        }
                    },
                    Err(error) => {
                        warn!(%error, "undecodable frame from server");
                        report(closed(format!("protocol error: {error}")));
                        return;
                    },
                }
            },
        }
    }
}
