//! Parsing of typed input lines.

use parley_client::{RoomId, UserId};
use thiserror::Error;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// `/room <id>`: open a room
    Open(RoomId),
    /// `/leave`: close the current room
    Leave,
    /// `/dm <user>`: open the personal room with a user
    Direct(UserId),
    /// `/focus on|off`: report window focus
    Focus(bool),
    /// `/quit`
    Quit,
    /// Anything else is a message for the open room
    Message(String),
    /// Blank line
    Empty,
}

/// Malformed slash command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Command needs a numeric id
    #[error("/{command} expects a numeric id, got {arg:?}")]
    BadId {
        /// Command name
        command: &'static str,
        /// What was typed
        arg: String,
    },

    /// `/focus` needs `on` or `off`
    #[error("/focus expects on or off, got {0:?}")]
    BadFocus(String),

    /// Unrecognized command
    #[error("unknown command /{0}")]
    Unknown(String),
}

impl Input {
    /// Parse one line.
    ///
    /// A leading `//` escapes a message that starts with a slash.
    pub fn parse(line: &str) -> Result<Self, InputError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(Self::Empty);
        }
        if let Some(escaped) = line.strip_prefix("//") {
            return Ok(Self::Message(format!("/{escaped}")));
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Self::Message(line.to_string()));
        };

        let mut words = command.split_whitespace();
        let name = words.next().unwrap_or_default();
        let arg = words.next().unwrap_or_default();

        match name {
            "room" => parse_id("room", arg).map(Self::Open),
            "dm" => parse_id("dm", arg).map(Self::Direct),
            "leave" => Ok(Self::Leave),
            "quit" | "exit" => Ok(Self::Quit),
            "focus" => match arg {
                "on" => Ok(Self::Focus(true)),
                "off" => Ok(Self::Focus(false)),
                other => Err(InputError::BadFocus(other.to_string())),
            },
            other => Err(InputError::Unknown(other.to_string())),
        }
    }
}

fn parse_id(command: &'static str, arg: &str) -> Result<u64, InputError> {
    arg.parse().map_err(|_| InputError::BadId { command, arg: arg.to_string() })
}
