//! Parley terminal client.
//!
//! # Usage
//!
//! ```bash
//! PARLEY_TOKEN=... parley --server wss://chat.example.com \
//!     --api https://api.example.com --user-id 42 --room 7
//! ```
//!
//! Lines typed on stdin are sent to the open room. `/room <id>`, `/leave`,
//! `/dm <user>`, `/focus on|off` and `/quit` control the session.

mod input;

use std::{collections::HashMap, time::Duration};

use clap::Parser;
use input::Input;
use parley_client::{
    Client, ClientConfig, Credential, MessageId, Notification, RoomId, Runtime, RuntimeHandle,
    SystemEnv, http::HttpRestApi, transport::WsDriver,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley chat client
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Terminal client for parley chat rooms")]
#[command(version)]
struct Args {
    /// Push endpoint (ws:// or wss://)
    #[arg(short, long, env = "PARLEY_SERVER")]
    server: String,

    /// REST base URL
    #[arg(short, long, env = "PARLEY_API")]
    api: String,

    /// Bearer token
    #[arg(short, long, env = "PARLEY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Local user id
    #[arg(short, long, env = "PARLEY_USER_ID")]
    user_id: u64,

    /// Room to open after connecting
    #[arg(short, long)]
    room: Option<RoomId>,

    /// Handshake timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Renders notifications as log lines.
///
/// Remembers the last message shown per room so each change prints only
/// what is new.
#[derive(Default)]
struct Printer {
    shown: HashMap<RoomId, MessageId>,
}

impl Printer {
    fn notify(&mut self, client: &Client<SystemEnv>, notification: &Notification) {
        match notification {
            Notification::StateChanged { to, .. } => info!(state = ?to, "connection"),
            Notification::Disconnected { reason } => warn!(%reason, "disconnected"),
            Notification::AuthFailed { reason } => warn!(%reason, "credential rejected"),
            Notification::MessagesChanged { room_id } => self.print_new(client, *room_id),
            Notification::RoomsChanged => {
                for room in client.rooms().iter() {
                    info!(
                        room_id = room.room_id,
                        name = %room.name,
                        unread = room.unread_count,
                        "room"
                    );
                }
            },
            Notification::ActiveRoomChanged { room_id } => info!(?room_id, "active room"),
            Notification::ServerError(notice) => warn!(message = %notice.toast, "server error"),
            Notification::SendFailed { room_id, reason } => warn!(room_id, %reason, "send failed"),
            Notification::Toast(text) => warn!("{text}"),
        }
    }

    fn print_new(&mut self, client: &Client<SystemEnv>, room_id: RoomId) {
        if client.active_room() != Some(room_id) {
            return;
        }
        let last = self.shown.get(&room_id).copied().unwrap_or(0);
        for message in client.messages(room_id).filter(|m| m.message_id > last) {
            info!(target: "chat", room_id, "{}: {}", sender_label(message), message.content);
            self.shown.insert(room_id, message.message_id);
        }
    }
}

fn sender_label(message: &parley_core::ChatMessage) -> String {
    if message.sender.name.is_empty() {
        format!("user {}", message.sender.user_id)
    } else {
        message.sender.name.clone()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = ClientConfig::new(args.user_id);
    config.connection.connect_timeout = Duration::from_secs(args.connect_timeout);

    let driver = WsDriver::new(&args.server, config.connection.connect_timeout);
    let rest = HttpRestApi::new(&args.api, args.token.clone());
    let mut printer = Printer::default();
    let observer = move |client: &Client<SystemEnv>, notification: &Notification| {
        printer.notify(client, notification);
    };

    info!(url = driver.url(), "parley starting");
    let (runtime, handle) = Runtime::new(SystemEnv::new(), config, driver, rest, observer);
    let task = tokio::spawn(runtime.run());

    handle.focus_changed(true)?;
    if let Some(room_id) = args.room {
        handle.set_active_room(Some(room_id))?;
    }
    handle.connect(args.token.map(Credential::bearer))?;

    let result = read_input(&handle).await;
    handle.shutdown()?;
    task.await?;
    result
}

/// Forward stdin to the runtime until `/quit` or end of input.
async fn read_input(handle: &RuntimeHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut active: Option<RoomId> = None;

    while let Some(line) = lines.next_line().await? {
        let input = match Input::parse(&line) {
            Ok(input) => input,
            Err(error) => {
                warn!(%error, "ignored");
                continue;
            },
        };

        match input {
            Input::Open(room_id) => {
                active = Some(room_id);
                handle.set_active_room(active)?;
            },
            Input::Leave => {
                active = None;
                handle.set_active_room(None)?;
            },
            Input::Direct(user_id) => handle.start_personal_room(user_id)?,
            Input::Focus(focused) => handle.focus_changed(focused)?,
            Input::Quit => break,
            Input::Empty => {},
            Input::Message(text) => {
                let Some(room_id) = active else {
                    warn!("no room open; use /room <id>");
                    continue;
                };
                if let Err(error) = handle.send(room_id, text).await {
                    warn!(%error, "not sent");
                }
            },
        }
    }
    Ok(())
}
