//! Messages, streams, and stream reconstruction.
//!
//! A connection owns two [`Stream`]s, one per direction. Each stream is an
//! append-only history of the messages seen so far plus the message
//! currently under evaluation. Predicates read the current message and the
//! prior history; once the decision is made the current message is
//! committed to history, blocked or not.

mod http;
mod reconstruct;

pub use http::{HttpMessage, HttpParseError, StartLine};
pub use reconstruct::{Reconstructor, StreamEvent};

#[cfg(test)]
pub(crate) fn parse_request_bytes(buf: &[u8]) -> Option<(HttpMessage, usize)> {
    http::parse_message(buf, http::HttpRole::Request).ok().flatten()
}

#[cfg(test)]
pub(crate) fn parse_response_bytes(buf: &[u8]) -> Option<(HttpMessage, usize)> {
    http::parse_message(buf, http::HttpRole::Response).ok().flatten()
}

use bytes::Bytes;

/// Traffic direction relative to the backend service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client → backend.
    In,
    /// Backend → client.
    Out,
}

impl Direction {
    /// Filename suffix used by the filter module discovery convention.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// How a stream's bytes are cut into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Each socket read is one opaque message.
    Raw,
    /// Messages are parsed HTTP requests or responses.
    Http,
}

/// One reconstructed message. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Message {
    wire: Bytes,
    http: Option<HttpMessage>,
    fallback: bool,
}

impl Message {
    /// An opaque raw message.
    pub fn raw(wire: Bytes) -> Self {
        Self {
            wire,
            http: None,
            fallback: false,
        }
    }

    /// A parsed HTTP message together with its exact wire bytes.
    pub fn http(wire: Bytes, parsed: HttpMessage) -> Self {
        Self {
            wire,
            http: Some(parsed),
            fallback: false,
        }
    }

    /// A reconstruction-failure fallback: buffered bytes delivered raw.
    pub fn fallback(wire: Bytes) -> Self {
        Self {
            wire,
            http: None,
            fallback: true,
        }
    }

    /// The exact bytes as read from the socket.
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Cheap handle to the wire bytes, for forwarding.
    pub fn wire_bytes(&self) -> Bytes {
        self.wire.clone()
    }

    /// The parsed HTTP view, if this message came off a structured stream.
    pub fn as_http(&self) -> Option<&HttpMessage> {
        self.http.as_ref()
    }

    /// Whether this message is a reconstruction fallback (forwarded
    /// unfiltered).
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

/// Ordered message history for one direction of one connection.
///
/// Exclusively owned by its connection pump; never shared across
/// connections. History is append-only: entries are never mutated or
/// removed once committed.
#[derive(Debug)]
pub struct Stream {
    kind: StreamKind,
    direction: Direction,
    history: Vec<Message>,
    current: Option<Message>,
}

impl Stream {
    pub fn new(kind: StreamKind, direction: Direction) -> Self {
        Self {
            kind,
            direction,
            history: Vec::new(),
            current: None,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Stage a freshly reconstructed message for evaluation.
    ///
    /// Any previously staged message is committed first, so a caller that
    /// forgets to [`commit`](Self::commit) cannot lose history.
    pub fn begin(&mut self, message: Message) {
        if let Some(prev) = self.current.take() {
            self.history.push(prev);
        }
        self.current = Some(message);
    }

    /// Commit the message under evaluation to history.
    pub fn commit(&mut self) {
        if let Some(message) = self.current.take() {
            self.history.push(message);
        }
    }

    /// The message currently under evaluation.
    pub fn current(&self) -> Option<&Message> {
        self.current.as_ref()
    }

    /// A committed message, counting backwards: `back == 0` is the
    /// immediately preceding message.
    pub fn previous(&self, back: usize) -> Option<&Message> {
        self.history.len().checked_sub(back + 1).map(|i| &self.history[i])
    }

    /// Number of committed messages.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Committed messages in arrival order.
    pub fn history(&self) -> &[Message] {
        &self.history
    }
}
