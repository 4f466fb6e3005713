//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` provides the same interface as `WsDriver` but talks to a
//! [`SimServer`](crate::SimServer) in memory. It implements [`Driver`] so the
//! same [`parley_client::Runtime`] orchestration code runs in both production
//! and simulation.

use std::collections::VecDeque;

use parley_client::{Driver, TransportEvent};
use parley_proto::Frame;
use tokio::sync::mpsc;
use tracing::debug;

use crate::sim_server::{ConnId, SharedSimServer, lock};

/// Error type for simulation driver.
#[derive(Debug, Clone)]
pub struct SimDriverError(pub String);

impl std::fmt::Display for SimDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriverError: {}", self.0)
    }
}

impl std::error::Error for SimDriverError {}

/// Simulation driver for runtime tests.
///
/// Owns at most one socket on the shared server. Dropping the receiver of a
/// closed socket discards anything the server still had queued for it.
pub struct SimDriver {
    server: SharedSimServer,
    conn: Option<ConnId>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    /// Events produced locally, such as a refused open
    local: VecDeque<TransportEvent>,
}

impl SimDriver {
    /// Driver for `server`.
    pub fn new(server: SharedSimServer) -> Self {
        Self { server, conn: None, events: None, local: VecDeque::new() }
    }

    /// Socket currently held, if any.
    pub fn conn(&self) -> Option<ConnId> {
        self.conn
    }

    fn drop_socket(&mut self) {
        if let Some(conn) = self.conn.take() {
            lock(&self.server).close(conn);
        }
        self.events = None;
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    fn open(&mut self) {
        self.drop_socket();

        let accepted = lock(&self.server).accept();
        match accepted {
            Ok((conn, events)) => {
                debug!(conn, "sim socket opened");
                self.conn = Some(conn);
                self.events = Some(events);
            },
            Err(reason) => self.local.push_back(TransportEvent::Closed { reason }),
        }
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), SimDriverError> {
        let conn = self.conn.ok_or_else(|| SimDriverError("not connected".to_string()))?;
        if lock(&self.server).receive(conn, frame) {
            Ok(())
        } else {
            Err(SimDriverError("socket closed".to_string()))
        }
    }

    async fn send_heartbeat(&mut self) -> Result<(), SimDriverError> {
        let conn = self.conn.ok_or_else(|| SimDriverError("not connected".to_string()))?;
        lock(&self.server).heartbeat(conn);
        Ok(())
    }

    fn close(&mut self, reason: &str) {
        debug!(conn = ?self.conn, reason, "sim socket closing");
        self.drop_socket();
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.local.pop_front() {
            return Some(event);
        }

        if let Some(events) = self.events.as_mut()
            && let Some(event) = events.recv().await
        {
            return Some(event);
        }

        // Socket gone: nothing more will arrive until the next open
        std::future::pending().await
    }
}
