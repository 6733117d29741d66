//! Stream reconstruction: raw byte chunks in, discrete messages out.
//!
//! Raw streams impose no framing: every socket read is one message. HTTP
//! streams accumulate bytes until a complete request or response parses
//! out of the front of the buffer. A malformed message, or one still
//! incomplete past the buffer limit, falls back to raw delivery and the
//! direction degrades to raw framing for the rest of the connection, so a
//! misbehaving peer cannot stall the proxy.

use bytes::{Bytes, BytesMut};

use super::http::{self, HttpRole};
use super::{Direction, Message, StreamKind};

/// One reconstruction outcome.
#[derive(Debug)]
pub enum StreamEvent {
    /// A complete message, to be evaluated and then forwarded or dropped.
    Message(Message),
    /// Reconstruction gave up: buffered bytes to forward unfiltered.
    Fallback(Message),
}

/// Per-direction reconstruction state machine.
#[derive(Debug)]
pub struct Reconstructor {
    kind: StreamKind,
    role: HttpRole,
    buf: BytesMut,
    max_buffer: usize,
    degraded: bool,
}

impl Reconstructor {
    pub fn new(kind: StreamKind, direction: Direction, max_buffer: usize) -> Self {
        let role = match direction {
            Direction::In => HttpRole::Request,
            Direction::Out => HttpRole::Response,
        };
        Self {
            kind,
            role,
            buf: BytesMut::new(),
            max_buffer,
            degraded: false,
        }
    }

    /// Whether this direction has fallen back to raw framing.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Feed one socket read; returns zero or more completed events.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if chunk.is_empty() {
            return Vec::new();
        }

        if matches!(self.kind, StreamKind::Raw) || self.degraded {
            return vec![StreamEvent::Message(Message::raw(
                Bytes::copy_from_slice(chunk),
            ))];
        }

        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            match http::parse_message(&self.buf, self.role) {
                Ok(Some((parsed, consumed))) => {
                    let wire = self.buf.split_to(consumed).freeze();
                    events.push(StreamEvent::Message(Message::http(wire, parsed)));
                    if self.buf.is_empty() {
                        break;
                    }
                }
                Ok(None) => {
                    if self.buf.len() > self.max_buffer {
                        tracing::warn!(
                            buffered = self.buf.len(),
                            limit = self.max_buffer,
                            "message exceeded reconstruction buffer, falling back to raw"
                        );
                        events.push(self.degrade());
                    }
                    break;
                }
                Err(error) => {
                    tracing::warn!(
                        %error,
                        buffered = self.buf.len(),
                        "unparseable message, falling back to raw"
                    );
                    events.push(self.degrade());
                    break;
                }
            }
        }

        events
    }

    /// Flush the accumulation buffer as an unfiltered fallback message and
    /// switch to raw framing permanently.
    fn degrade(&mut self) -> StreamEvent {
        self.degraded = true;
        let wire = self.buf.split().freeze();
        StreamEvent::Fallback(Message::fallback(wire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recon_http(max: usize) -> Reconstructor {
        Reconstructor::new(StreamKind::Http, Direction::In, max)
    }

    #[test]
    fn raw_mode_one_read_one_message() {
        let mut r = Reconstructor::new(StreamKind::Raw, Direction::In, 1024);
        let events = r.push(b"hello world");
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Message(m) => assert_eq!(m.wire(), b"hello world"),
            StreamEvent::Fallback(_) => panic!("raw mode never falls back"),
        }
    }

    #[test]
    fn http_request_across_partial_reads() {
        let mut r = recon_http(1024);
        assert!(r.push(b"GET /x HTTP/1.1\r\nHost:").is_empty());
        let events = r.push(b" svc\r\n\r\n");
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Message(m) => {
                let parsed = m.as_http().unwrap();
                assert_eq!(parsed.method(), Some("GET"));
                assert_eq!(m.wire(), b"GET /x HTTP/1.1\r\nHost: svc\r\n\r\n");
            }
            StreamEvent::Fallback(_) => panic!("expected a complete message"),
        }
    }

    #[test]
    fn pipelined_requests_split_into_two_messages() {
        let mut r = recon_http(1024);
        let events = r.push(
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
        );
        assert_eq!(events.len(), 2);
        for (event, target) in events.iter().zip(["/a", "/b"]) {
            match event {
                StreamEvent::Message(m) => {
                    assert_eq!(m.as_http().unwrap().target(), Some(target));
                }
                StreamEvent::Fallback(_) => panic!("expected complete messages"),
            }
        }
    }

    #[test]
    fn overflow_falls_back_and_degrades() {
        let mut r = recon_http(32);
        // Valid prefix of a request that never completes.
        let events = r.push(b"POST /upload HTTP/1.1\r\nContent-Length: 999999\r\n\r\nAAAA");
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Fallback(m) => {
                assert!(m.is_fallback());
                assert!(m.wire().starts_with(b"POST /upload"));
            }
            StreamEvent::Message(_) => panic!("expected fallback"),
        }
        assert!(r.is_degraded());

        // Subsequent reads are raw messages, still evaluated.
        let events = r.push(b"BBBB");
        match &events[0] {
            StreamEvent::Message(m) => {
                assert_eq!(m.wire(), b"BBBB");
                assert!(!m.is_fallback());
            }
            StreamEvent::Fallback(_) => panic!("degraded reads are plain raw messages"),
        }
    }

    #[test]
    fn garbage_falls_back_immediately() {
        let mut r = recon_http(1024);
        let events = r.push(b"\x00\x01\x02binary junk\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Fallback(_)));
        assert!(r.is_degraded());
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        let mut r = recon_http(1024);
        assert!(r.push(b"").is_empty());
    }
}
