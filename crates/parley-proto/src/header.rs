//! STOMP frame headers.
//!
//! Headers are an ordered list of `name:value` pairs. Order is preserved on the
//! wire and lookups return the first occurrence, which is the value STOMP 1.2
//! mandates when a header is repeated.

use crate::errors::{ProtocolError, Result};

/// Well-known header names.
pub mod names {
    /// Versions the client accepts (CONNECT).
    pub const ACCEPT_VERSION: &str = "accept-version";
    /// Virtual host (CONNECT).
    pub const HOST: &str = "host";
    /// Heart-beat negotiation `<outgoing>,<incoming>` in milliseconds.
    pub const HEART_BEAT: &str = "heart-beat";
    /// Bearer credential (CONNECT).
    pub const AUTHORIZATION: &str = "Authorization";
    /// Subscription identifier (SUBSCRIBE, UNSUBSCRIBE, MESSAGE).
    pub const ID: &str = "id";
    /// Subscription a MESSAGE was routed through.
    pub const SUBSCRIPTION: &str = "subscription";
    /// Topic or queue (SUBSCRIBE, SEND, MESSAGE).
    pub const DESTINATION: &str = "destination";
    /// Body MIME type.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Body length in octets.
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Broker-assigned message identifier (MESSAGE).
    pub const MESSAGE_ID: &str = "message-id";
    /// Receipt requested by the client.
    pub const RECEIPT: &str = "receipt";
    /// Receipt being acknowledged by the server (RECEIPT).
    pub const RECEIPT_ID: &str = "receipt-id";
    /// Short error description (ERROR).
    pub const MESSAGE: &str = "message";
    /// Protocol version chosen by the server (CONNECTED).
    pub const VERSION: &str = "version";
}

/// Ordered frame headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any earlier value with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`. `None` if absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// All headers in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header lines, counting repeats.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Escape a header name or value for the wire.
pub(crate) fn escape(raw: &str, out: &mut Vec<u8>) {
    for byte in raw.bytes() {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b':' => out.extend_from_slice(b"\\c"),
            other => out.push(other),
        }
    }
}

/// Reverse [`escape`].
pub(crate) fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(ProtocolError::InvalidEscape(raw.to_string())),
        }
    }

    Ok(out)
}
