//! Broker frame codec.
//!
//! Frames follow the STOMP 1.2 layout:
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! body\0
//! ```
//!
//! A bare end-of-line between frames is a heart-beat. One transport message
//! may carry several frames, and a frame may be split across messages, so
//! decoding goes through the buffering [`FrameDecoder`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Protocol version advertised in CONNECT.
pub const ACCEPT_VERSION: &str = "1.2";

/// Upper bound on undecoded bytes held by a decoder.
const MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// Whole-word phrases in ERROR messages that mean the credential was refused.
const AUTH_REJECTION_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "authentication failed",
    "forbidden",
    "access denied",
    "invalid token",
    "token expired",
    "expired token",
    "jwt expired",
    "401",
    "403",
];

// ============================================================================
// FrameCommand
// ============================================================================

/// Frame command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCommand {
    /// Client connect request.
    Connect,
    /// Server connect acknowledgment.
    Connected,
    /// Client publish.
    Send,
    /// Client subscription request.
    Subscribe,
    /// Client subscription removal.
    Unsubscribe,
    /// Server-pushed message.
    Message,
    /// Server receipt for a client frame.
    Receipt,
    /// Server-reported error.
    Error,
    /// Client graceful disconnect.
    Disconnect,
}

impl FrameCommand {
    /// Returns the wire name of the command.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// CONNECT and CONNECTED headers are not escaped.
    #[inline]
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl FromStr for FrameCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CONNECT" | "STOMP" => Ok(Self::Connect),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            "DISCONNECT" => Ok(Self::Disconnect),
            other => Err(Error::protocol(format!("Unknown frame command: {other:?}"))),
        }
    }
}

impl fmt::Display for FrameCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A single protocol frame.
///
/// Headers keep their wire order; when a header repeats, the first
/// occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command line.
    pub command: FrameCommand,
    /// Ordered header list.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[inline]
    #[must_use]
    pub fn new(command: FrameCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ============================================================================
// Frame - Constructors
// ============================================================================

impl Frame {
    /// CONNECT frame carrying the bearer credential.
    #[must_use]
    pub fn connect(host: &str, token: &str, heart_beat: HeartBeat) -> Self {
        Self::new(FrameCommand::Connect)
            .with_header("accept-version", ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.to_string())
            .with_header("Authorization", format!("Bearer {token}"))
    }

    /// SUBSCRIBE frame with automatic acknowledgment.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(FrameCommand::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    /// UNSUBSCRIBE frame.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(FrameCommand::Unsubscribe).with_header("id", id)
    }

    /// SEND frame.
    ///
    /// The body is text so `content-length` matches what [`encode`](Self::encode)
    /// puts on the wire.
    #[must_use]
    pub fn send(destination: &str, content_type: &str, body: impl Into<String>) -> Self {
        let body = body.into().into_bytes();
        Self::new(FrameCommand::Send)
            .with_header("destination", destination)
            .with_header("content-type", content_type)
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    /// DISCONNECT frame.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(FrameCommand::Disconnect)
    }
}

// ============================================================================
// Frame - Inspection
// ============================================================================

impl Frame {
    /// Returns `true` if this ERROR frame rejects the credential.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        if self.command != FrameCommand::Error {
            return false;
        }

        let text = format!("{} {}", self.header("message").unwrap_or_default(), self.body_text());
        let words = word_sequence(&text);

        AUTH_REJECTION_MARKERS
            .iter()
            .any(|marker| words.contains(&format!(" {marker} ")))
    }

    /// Returns the human-readable error text of an ERROR frame.
    #[must_use]
    pub fn error_message(&self) -> String {
        match self.header("message") {
            Some(message) if !message.is_empty() => message.to_string(),
            _ => self.body_text().trim().to_string(),
        }
    }

    /// Converts an ERROR frame into the matching crate error.
    #[must_use]
    pub fn to_error(&self) -> Error {
        let message = self.error_message();
        if self.is_auth_rejection() {
            Error::authentication_rejected(message)
        } else {
            Error::broker(message)
        }
    }
}

// ============================================================================
// Frame - Encoding
// ============================================================================

impl Frame {
    /// Encodes the frame for a text transport.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());

        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&String::from_utf8_lossy(&self.body));
        out.push('\0');
        out
    }
}

/// Lowercases `text` into space-separated alphanumeric words, padded with
/// a space on each side so phrases only match on word boundaries.
fn word_sequence(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    for word in text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        out.push_str(&word.to_ascii_lowercase());
        out.push(' ');
    }
    out
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String> {
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
            other => {
                return Err(Error::protocol(format!(
                    "Invalid header escape sequence: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }

    Ok(out)
}

// ============================================================================
// FrameDecoder
// ============================================================================

/// One unit produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Bare end-of-line heart-beat.
    Heartbeat,
    /// Complete frame.
    Frame(Frame),
}

/// Incremental frame decoder.
///
/// Feed transport messages with [`FrameDecoder::push`] and drain complete
/// frames with [`FrameDecoder::next`]. One decoder per connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes to the decode buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the buffer would exceed its limit.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        if self.buffer.len() + data.len() > MAX_BUFFERED_BYTES {
            self.buffer.clear();
            return Err(Error::protocol(format!(
                "Frame exceeds {MAX_BUFFERED_BYTES} bytes"
            )));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Returns the number of undecoded bytes.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next heart-beat or frame.
    ///
    /// Returns `Ok(None)` when more input is needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on a malformed frame. The buffer is
    /// discarded, since the stream cannot be resynchronized.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Decoded>> {
        match self.decode() {
            Ok(decoded) => Ok(decoded),
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }

    fn decode(&mut self) -> Result<Option<Decoded>> {
        if self.buffer.first() == Some(&b'\n') {
            self.buffer.drain(..1);
            return Ok(Some(Decoded::Heartbeat));
        }
        if self.buffer.starts_with(b"\r\n") {
            self.buffer.drain(..2);
            return Ok(Some(Decoded::Heartbeat));
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let Some((head_len, body_start)) = find_header_end(&self.buffer) else {
            return Ok(None);
        };

        let head = std::str::from_utf8(&self.buffer[..head_len])
            .map_err(|e| Error::protocol(format!("Frame head is not UTF-8: {e}")))?;
        let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

        let command: FrameCommand = lines.next().unwrap_or_default().parse()?;
        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::protocol(format!("Malformed header line: {line:?}")))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| Error::protocol(format!("Invalid content-length: {v:?}")))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                let end = body_start
                    .checked_add(len)
                    .filter(|&end| end < MAX_BUFFERED_BYTES)
                    .ok_or_else(|| Error::protocol(format!("Invalid content-length: {len}")))?;
                if self.buffer.len() <= end {
                    return Ok(None);
                }
                if self.buffer[end] != 0 {
                    return Err(Error::protocol(
                        "Frame body not terminated by NUL after content-length",
                    ));
                }
                end
            }
            None => match self.buffer[body_start..].iter().position(|&b| b == 0) {
                Some(offset) => body_start + offset,
                None => return Ok(None),
            },
        };

        let body = self.buffer[body_start..body_end].to_vec();
        self.buffer.drain(..=body_end);

        Ok(Some(Decoded::Frame(Frame {
            command,
            headers,
            body,
        })))
    }
}

/// Locates the blank line ending the header block.
///
/// Returns `(head_len, body_start)`.
fn find_header_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buffer.len() {
        if buffer[i] == b'\n' {
            match buffer.get(i + 1) {
                Some(b'\n') => return Some((i, i + 2)),
                Some(b'\r') if buffer.get(i + 2) == Some(&b'\n') => return Some((i, i + 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

// ============================================================================
// HeartBeat
// ============================================================================

/// Heart-beat header value: `<outgoing>,<incoming>` in milliseconds.
///
/// Zero disables the corresponding direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Interval at which this side can send.
    pub outgoing_ms: u64,
    /// Interval at which this side wants to receive.
    pub incoming_ms: u64,
}

impl HeartBeat {
    /// Creates a heart-beat setting.
    #[inline]
    #[must_use]
    pub const fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Negotiates client intervals against the server's CONNECTED header.
    #[must_use]
    pub fn negotiate(client: Self, server: Self) -> NegotiatedHeartBeat {
        let pick = |ours: u64, theirs: u64| {
            (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
        };

        NegotiatedHeartBeat {
            send_every: pick(client.outgoing_ms, server.incoming_ms),
            expect_every: pick(client.incoming_ms, server.outgoing_ms),
        }
    }
}

impl FromStr for HeartBeat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (out, inc) = s
            .split_once(',')
            .ok_or_else(|| Error::protocol(format!("Malformed heart-beat header: {s:?}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| Error::protocol(format!("Malformed heart-beat header: {s:?}")))
        };
        Ok(Self::new(parse(out)?, parse(inc)?))
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// Heart-beat intervals in effect for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartBeat {
    /// How often the client must send something.
    pub send_every: Option<Duration>,
    /// How often the server promised to send something.
    pub expect_every: Option<Duration>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn decode_all(input: &str) -> Vec<Decoded> {
        let mut decoder = FrameDecoder::new();
        decoder.push(input.as_bytes()).expect("push");
        let mut out = Vec::new();
        while let Some(item) = decoder.next().expect("decode") {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_encode_subscribe() {
        let frame = Frame::subscribe("sub-1", "/topic/tasks");
        assert_eq!(
            frame.encode(),
            "SUBSCRIBE\nid:sub-1\ndestination:/topic/tasks\nack:auto\n\n\0"
        );
    }

    #[test]
    fn test_encode_connect_carries_bearer() {
        let frame = Frame::connect("tasks.example.com", "abc", HeartBeat::new(10_000, 10_000));
        let text = frame.encode();
        assert!(text.starts_with("CONNECT\n"));
        assert!(text.contains("accept-version:1.2\n"));
        assert!(text.contains("heart-beat:10000,10000\n"));
        assert!(text.contains("Authorization:Bearer abc\n"));
    }

    #[test]
    fn test_encode_escapes_headers() {
        let frame = Frame::new(FrameCommand::Send).with_header("x-note", "a:b\nc\\d");
        assert!(frame.encode().contains("x-note:a\\cb\\nc\\\\d\n"));
    }

    #[test]
    fn test_decode_message() {
        let items = decode_all("MESSAGE\ndestination:/user/queue/notifications\nsubscription:sub-0\n\n{\"a\":1}\0");
        assert_eq!(items.len(), 1);
        let Decoded::Frame(frame) = &items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.command, FrameCommand::Message);
        assert_eq!(frame.header("destination"), Some("/user/queue/notifications"));
        assert_eq!(frame.body, b"{\"a\":1}");
    }

    #[test]
    fn test_decode_heartbeats_between_frames() {
        let items = decode_all("\n\r\nCONNECTED\nversion:1.2\n\n\0\n");
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], Decoded::Heartbeat);
        assert_eq!(items[1], Decoded::Heartbeat);
        assert!(matches!(&items[2], Decoded::Frame(f) if f.command == FrameCommand::Connected));
        assert_eq!(items[3], Decoded::Heartbeat);
    }

    #[test]
    fn test_decode_crlf_lines() {
        let items = decode_all("RECEIPT\r\nreceipt-id:7\r\n\r\n\0");
        let Decoded::Frame(frame) = &items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.header("receipt-id"), Some("7"));
    }

    #[test]
    fn test_decode_split_across_pushes() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"MESSAGE\ndestination:/topic/a\n").expect("push");
        assert_eq!(decoder.next().expect("decode"), None);
        decoder.push(b"\nhello").expect("push");
        assert_eq!(decoder.next().expect("decode"), None);
        decoder.push(b"\0").expect("push");
        assert!(matches!(decoder.next().expect("decode"), Some(Decoded::Frame(_))));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_content_length_allows_nul_in_body() {
        let mut decoder = FrameDecoder::new();
        decoder
            .push(b"MESSAGE\ndestination:/topic/a\ncontent-length:3\n\na\0b\0")
            .expect("push");
        let Some(Decoded::Frame(frame)) = decoder.next().expect("decode") else {
            panic!("expected frame");
        };
        assert_eq!(frame.body, b"a\0b");
    }

    #[test]
    fn test_decode_repeated_header_first_wins() {
        let items = decode_all("MESSAGE\nfoo:1\nfoo:2\n\n\0");
        let Decoded::Frame(frame) = &items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.header("foo"), Some("1"));
    }

    #[test]
    fn test_decode_unknown_command_is_protocol_error() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"BOGUS\n\n\0").expect("push");
        let err = decoder.next().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_bad_content_length() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"MESSAGE\ncontent-length:2\n\nabc\0").expect("push");
        assert!(decoder.next().is_err());
    }

    #[test]
    fn test_decode_bad_escape() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"MESSAGE\nfoo:a\\tb\n\n\0").expect("push");
        assert!(decoder.next().is_err());
    }

    #[test]
    fn test_connected_headers_not_unescaped() {
        let items = decode_all("CONNECTED\nserver:broker\\1\n\n\0");
        let Decoded::Frame(frame) = &items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.header("server"), Some("broker\\1"));
    }

    #[test]
    fn test_push_limit() {
        let mut decoder = FrameDecoder::new();
        let big = vec![b'x'; MAX_BUFFERED_BYTES + 1];
        assert!(decoder.push(&big).is_err());
    }

    #[test]
    fn test_auth_rejection_detection() {
        let auth = Frame::new(FrameCommand::Error).with_header("message", "401 Unauthorized");
        assert!(auth.is_auth_rejection());
        assert!(auth.to_error().is_auth_failure());

        let body_only = Frame::new(FrameCommand::Error).with_body("JWT token expired");
        assert!(body_only.is_auth_rejection());

        let other = Frame::new(FrameCommand::Error).with_header("message", "destination full");
        assert!(!other.is_auth_rejection());
        assert!(matches!(other.to_error(), Error::BrokerError { .. }));

        let not_error = Frame::new(FrameCommand::Message).with_header("message", "401");
        assert!(!not_error.is_auth_rejection());
    }

    #[test]
    fn test_send_content_length_matches_encoded_body() {
        let frame = Frame::send("/app/echo", "text/plain", "naïve ✓");
        let wire = frame.encode();
        let body = wire
            .split_once("\n\n")
            .map(|(_, rest)| rest.trim_end_matches('\0'))
            .expect("body");

        assert_eq!(frame.header("content-length"), Some(body.len().to_string().as_str()));

        let mut decoder = FrameDecoder::new();
        decoder.push(wire.as_bytes()).expect("push");
        let Some(Decoded::Frame(decoded)) = decoder.next().expect("decode") else {
            panic!("expected frame");
        };
        assert_eq!(decoded.body_text(), "naïve ✓");
    }

    #[test]
    fn test_auth_rejection_matches_whole_words_only() {
        let queue = Frame::new(FrameCommand::Error).with_header("message", "queue 4013 full");
        assert!(!queue.is_auth_rejection());

        let lease = Frame::new(FrameCommand::Error).with_body("subscription lease expired");
        assert!(!lease.is_auth_rejection());

        let coded = Frame::new(FrameCommand::Error).with_header("message", "HTTP/403: Forbidden");
        assert!(coded.is_auth_rejection());

        let body = Frame::new(FrameCommand::Error).with_body("Access-Denied for session");
        assert!(body.is_auth_rejection());
    }

    #[test]
    fn test_decode_oversized_content_length_is_protocol_error() {
        let mut decoder = FrameDecoder::new();
        decoder
            .push(b"MESSAGE\ndestination:/topic/a\ncontent-length:18446744073709551615\n\nx\0")
            .expect("push");

        let err = decoder.next().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_content_length_beyond_buffer_limit() {
        let mut decoder = FrameDecoder::new();
        let frame = format!("MESSAGE\ncontent-length:{}\n\nx\0", MAX_BUFFERED_BYTES);
        decoder.push(frame.as_bytes()).expect("push");

        assert!(matches!(decoder.next(), Err(Error::Protocol { .. })));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_heartbeat_parse_and_display() {
        let hb: HeartBeat = "10000, 5000".parse().expect("parse");
        assert_eq!(hb, HeartBeat::new(10_000, 5_000));
        assert_eq!(hb.to_string(), "10000,5000");
        assert!("10000".parse::<HeartBeat>().is_err());
        assert!("a,b".parse::<HeartBeat>().is_err());
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let client = HeartBeat::new(10_000, 10_000);

        let n = HeartBeat::negotiate(client, HeartBeat::new(20_000, 5_000));
        assert_eq!(n.send_every, Some(Duration::from_millis(10_000)));
        assert_eq!(n.expect_every, Some(Duration::from_millis(20_000)));

        let off = HeartBeat::negotiate(client, HeartBeat::new(0, 0));
        assert_eq!(off.send_every, None);
        assert_eq!(off.expect_every, None);
    }

    proptest! {
        #[test]
        fn prop_header_values_survive_escaping(value in "[ -~\\n\\r]{0,40}") {
            let frame = Frame::new(FrameCommand::Message)
                .with_header("destination", "/topic/x")
                .with_header("x-value", value.clone());
            let mut decoder = FrameDecoder::new();
            decoder.push(frame.encode().as_bytes()).unwrap();
            let Some(Decoded::Frame(decoded)) = decoder.next().unwrap() else {
                panic!("expected frame");
            };
            prop_assert_eq!(decoded.header("x-value"), Some(value.as_str()));
        }

        #[test]
        fn prop_arbitrary_split_points_decode_identically(split in 0usize..60) {
            let wire = Frame::send("/app/echo", "text/plain", "payload body").encode();
            let split = split.min(wire.len());
            let mut decoder = FrameDecoder::new();
            decoder.push(&wire.as_bytes()[..split]).unwrap();
            let first = decoder.next().unwrap();
            decoder.push(&wire.as_bytes()[split..]).unwrap();
            let frame = match first {
                Some(Decoded::Frame(f)) => f,
                _ => match decoder.next().unwrap() {
                    Some(Decoded::Frame(f)) => f,
                    other => panic!("expected frame, got {other:?}"),
                },
            };
            prop_assert_eq!(frame.body, b"payload body".to_vec());
        }
    }
}
