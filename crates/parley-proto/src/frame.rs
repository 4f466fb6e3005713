//! STOMP frame codec.
//!
//! Wire layout (STOMP 1.2):
//!
//! ```text
//! COMMAND\n
//! name:value\n        (zero or more)
//! \n
//! <body octets>\0
//! ```
//!
//! Lines may end in `\r\n`. A bare EOL outside a frame is a heart-beat and
//! carries no frame. When `content-length` is present it bounds the body, so
//! the body may contain NUL octets; otherwise the body ends at the first NUL.
//!
//! # Invariants
//!
//! - Decoding never panics on untrusted input; every malformed frame yields a
//!   [`ProtocolError`].
//! - Bodies larger than [`MAX_FRAME_SIZE`] are rejected in both directions.

use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::{
    Destination,
    errors::{ProtocolError, Result},
    header::{self, Headers, names},
};

/// Maximum body size accepted or produced (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// STOMP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake
    Connect,
    /// Client handshake (1.2 alias of CONNECT)
    Stomp,
    /// Server handshake reply
    Connected,
    /// Client publish
    Send,
    /// Client subscribe
    Subscribe,
    /// Client unsubscribe
    Unsubscribe,
    /// Client graceful shutdown
    Disconnect,
    /// Server push on a subscription
    Message,
    /// Server acknowledgement of a `receipt` header
    Receipt,
    /// Server error; the server closes the connection afterwards
    Error,
}

impl Command {
    /// Wire spelling of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim for compatibility with
    /// STOMP 1.0 peers.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        })
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command
    pub command: Command,
    /// Headers in wire order
    pub headers: Headers,
    /// Raw body octets
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { command, headers: Headers::new(), body: Vec::new() }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. `None` if absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body as UTF-8 text.
    pub fn body_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// CONNECT frame carrying an optional bearer token and the heart-beat
    /// offer `(outgoing_ms, incoming_ms)`.
    #[must_use]
    pub fn connect(host: &str, token: Option<&str>, heart_beat: (u64, u64)) -> Self {
        let mut frame = Self::new(Command::Connect)
            .with_header(names::ACCEPT_VERSION, "1.2")
            .with_header(names::HOST, host)
            .with_header(names::HEART_BEAT, format!("{},{}", heart_beat.0, heart_beat.1));
        if let Some(token) = token {
            frame = frame.with_header(names::AUTHORIZATION, format!("Bearer {token}"));
        }
        frame
    }

    /// SUBSCRIBE frame binding `id` to `destination`.
    #[must_use]
    pub fn subscribe(id: &str, destination: &Destination) -> Self {
        Self::new(Command::Subscribe)
            .with_header(names::ID, id)
            .with_header(names::DESTINATION, destination.to_string())
    }

    /// UNSUBSCRIBE frame releasing `id`.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header(names::ID, id)
    }

    /// SEND frame with a JSON body.
    pub fn send_json<T: Serialize>(destination: &Destination, body: &T) -> Result<Self> {
        let body = serde_json::to_vec(body)?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
        }

        Ok(Self::new(Command::Send)
            .with_header(names::DESTINATION, destination.to_string())
            .with_header(names::CONTENT_TYPE, "application/json")
            .with_header(names::CONTENT_LENGTH, body.len().to_string())
            .with_body(body))
    }

    /// DISCONNECT frame requesting a receipt.
    #[must_use]
    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).with_header(names::RECEIPT, receipt)
    }

    /// Encode to wire bytes, including the NUL terminator.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the body exceeds [`MAX_FRAME_SIZE`]
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.body.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.body.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        let escaped = self.command.escapes_headers();
        for (name, value) in self.headers.iter() {
            if escaped {
                header::escape(name, &mut out);
                out.push(b':');
                header::escape(value, &mut out);
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        Ok(out)
    }

    /// Decode exactly one frame. Surrounding heart-beat EOLs are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if the input holds no complete frame
    /// - `ProtocolError::TrailingData` if it holds more than one
    /// - any error from [`Frame::decode_stream`]
    pub fn decode(input: &[u8]) -> Result<Self> {
        let mut frames = Self::decode_stream(input)?;
        match frames.len() {
            0 => Err(ProtocolError::Truncated),
            1 => frames.pop().ok_or(ProtocolError::Truncated),
            _ => Err(ProtocolError::TrailingData),
        }
    }

    /// Decode every frame in `input`, skipping heart-beat EOLs.
    ///
    /// Returns an empty vector for a pure heart-beat.
    pub fn decode_stream(input: &[u8]) -> Result<Vec<Self>> {
        let mut frames = Vec::new();
        let mut pos = 0;

        loop {
            while pos < input.len() && matches!(input[pos], b'\n' | b'\r') {
                pos += 1;
            }
            if pos >= input.len() {
                break;
            }

            let (frame, consumed) = parse_one(&input[pos..])?;
            frames.push(frame);
            pos += consumed;
        }

        Ok(frames)
    }
}

/// Parse one frame from the start of `input`, returning it and the number of
/// octets consumed (including the NUL).
fn parse_one(input: &[u8]) -> Result<(Frame, usize)> {
    let mut pos = 0;

    let command_line = read_line(input, &mut pos)?;
    let command_str = std::str::from_utf8(command_line)
        .map_err(|_| ProtocolError::UnknownCommand(String::from_utf8_lossy(command_line).into()))?;
    let command: Command = command_str.parse()?;

    let mut headers = Headers::new();
    loop {
        let line = read_line(input, &mut pos)?;
        if line.is_empty() {
            break;
        }

        let text = std::str::from_utf8(line).map_err(|_| {
            ProtocolError::MalformedHeader(String::from_utf8_lossy(line).into_owned())
        })?;
        let Some((name, value)) = text.split_once(':') else {
            return Err(ProtocolError::MalformedHeader(text.to_string()));
        };

        if command.escapes_headers() {
            headers.push(header::unescape(name)?, header::unescape(value)?);
        } else {
            headers.push(name, value);
        }
    }

    let rest = &input[pos..];
    let body_len = match headers.get(names::CONTENT_LENGTH) {
        Some(raw) => {
            let len: usize = raw
                .trim()
                .parse()
                .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string()))?;
            if len > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE });
            }
            match rest.get(len) {
                Some(0) => len,
                Some(_) => return Err(ProtocolError::InvalidContentLength(raw.to_string())),
                None => return Err(ProtocolError::Truncated),
            }
        },
        None => {
            let nul = rest.iter().position(|&b| b == 0).ok_or(ProtocolError::Truncated)?;
            if nul > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge { size: nul, max: MAX_FRAME_SIZE });
            }
            nul
        },
    };

    let body = rest[..body_len].to_vec();
    Ok((Frame { command, headers, body }, pos + body_len + 1))
}

/// Read one line, advancing `pos` past the EOL. Strips a trailing `\r`.
fn read_line<'a>(input: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let rest = input.get(*pos..).ok_or(ProtocolError::Truncated)?;
    let newline = rest.iter().position(|&b| b == b'\n').ok_or(ProtocolError::Truncated)?;

    let line = &rest[..newline];
    *pos += newline + 1;
    Ok(line.strip_suffix(b"\r").unwrap_or(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_subscribe() {
        let frame = Frame::subscribe("room-1", &Destination::RoomTopic(7));
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes, b"SUBSCRIBE\nid:room-1\ndestination:/topic/chat/rooms/7\n\n\0");
    }

    #[test]
    fn decode_message_without_content_length() {
        let raw = b"MESSAGE\nsubscription:room-1\ndestination:/topic/chat/rooms/7\n\n{\"a\":1}\0";
        let frame = Frame::decode(raw).unwrap();

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("room-1"));
        assert_eq!(frame.body, b"{\"a\":1}");
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let raw = b"MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = Frame::decode(raw).unwrap();
        assert_eq!(frame.body, b"a\0b");
    }

    #[test]
    fn content_length_mismatch_rejected() {
        let raw = b"MESSAGE\ncontent-length:2\n\nabc\0";
        assert!(matches!(Frame::decode(raw), Err(ProtocolError::InvalidContentLength(_))));
    }

    #[test]
    fn crlf_line_endings_accepted() {
        let raw = b"CONNECTED\r\nversion:1.2\r\n\r\n\0";
        let frame = Frame::decode(raw).unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header("version"), Some("1.2"));
    }

    #[test]
    fn heartbeat_only_input_yields_no_frames() {
        assert!(Frame::decode_stream(b"\n").unwrap().is_empty());
        assert!(Frame::decode_stream(b"\r\n\n").unwrap().is_empty());
        assert_eq!(Frame::decode(b"\n"), Err(ProtocolError::Truncated));
    }

    #[test]
    fn stream_with_heartbeats_between_frames() {
        let raw = b"\nRECEIPT\nreceipt-id:1\n\n\0\n\nRECEIPT\nreceipt-id:2\n\n\0\n";
        let frames = Frame::decode_stream(raw).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].header("receipt-id"), Some("2"));
        assert_eq!(Frame::decode(raw), Err(ProtocolError::TrailingData));
    }

    #[test]
    fn missing_terminator_is_truncated() {
        assert_eq!(Frame::decode(b"MESSAGE\nid:1\n\nbody"), Err(ProtocolError::Truncated));
        assert_eq!(Frame::decode(b"MESSAGE\nid:1"), Err(ProtocolError::Truncated));
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(matches!(Frame::decode(b"PUBLISH\n\n\0"), Err(ProtocolError::UnknownCommand(_))));
    }

    #[test]
    fn header_without_separator_rejected() {
        assert!(matches!(
            Frame::decode(b"MESSAGE\nnoseparator\n\n\0"),
            Err(ProtocolError::MalformedHeader(_))
        ));
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let frame = Frame::connect("chat", Some("abc"), (4000, 4000));
        let bytes = frame.encode().unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.contains("Authorization:Bearer abc\n"));
        assert!(text.contains("heart-beat:4000,4000\n"));
    }

    #[test]
    fn escaped_header_values_survive_decode() {
        let frame = Frame::new(Command::Error).with_header("message", "bad: token\nexpired");
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.header("message"), Some("bad: token\nexpired"));
    }

    #[test]
    fn oversized_body_rejected_on_encode() {
        let frame = Frame::new(Command::Send).with_body(vec![b'a'; MAX_FRAME_SIZE + 1]);
        assert!(matches!(frame.encode(), Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn oversized_content_length_rejected_on_decode() {
        let raw = format!("MESSAGE\ncontent-length:{}\n\n\0", MAX_FRAME_SIZE + 1);
        assert!(matches!(
            Frame::decode(raw.as_bytes()),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn send_json_sets_length_and_type() {
        #[derive(Serialize)]
        struct Body {
            content: &'static str,
        }

        let frame = Frame::send_json(&Destination::RoomSend(3), &Body { content: "hi" }).unwrap();
        assert_eq!(frame.header("destination"), Some("/app/chat/rooms/3"));
        assert_eq!(frame.header("content-type"), Some("application/json"));
        assert_eq!(frame.header("content-length"), Some("16"));
        assert_eq!(frame.body_str().unwrap(), "{\"content\":\"hi\"}");
    }
}
