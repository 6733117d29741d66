//! HTTP message parsing for structured streams.
//!
//! Incremental: the caller hands in its whole accumulation buffer and gets
//! back either a complete message plus the number of bytes it consumed, or
//! `None` when more bytes are needed. Header keys are case-normalized to
//! lowercase with duplicate keys resolved last-wins.

use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

const MAX_HEADERS: usize = 64;

/// Errors from HTTP reconstruction. All of them are non-fatal to the
/// connection: the reconstructor downgrades the stream to raw delivery.
#[derive(Debug, Error)]
pub enum HttpParseError {
    /// Malformed request/status line or header block.
    #[error("malformed header block: {0}")]
    Header(httparse::Error),

    /// `Content-Length` present but not a number.
    #[error("invalid content-length '{value}'")]
    InvalidContentLength { value: String },

    /// Chunked transfer framing violated.
    #[error("malformed chunked body")]
    MalformedChunk,
}

/// Start line of a parsed HTTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: String, target: String },
    Response { status: u16, reason: String },
}

/// A parsed HTTP request or response.
#[derive(Debug, Clone)]
pub struct HttpMessage {
    start: StartLine,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl HttpMessage {
    pub fn start_line(&self) -> &StartLine {
        &self.start
    }

    /// Request method, if this is a request.
    pub fn method(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// Request target (path + query), if this is a request.
    pub fn target(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { target, .. } => Some(target),
            StartLine::Response { .. } => None,
        }
    }

    /// Status code, if this is a response.
    pub fn status(&self) -> Option<u16> {
        match &self.start {
            StartLine::Request { .. } => None,
            StartLine::Response { status, .. } => Some(*status),
        }
    }

    /// Header lookup; `name` is matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Decoded body bytes (de-chunked for chunked transfer encoding).
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Which side of the exchange this parser expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HttpRole {
    Request,
    Response,
}

/// Try to parse one complete message from the front of `buf`.
///
/// Returns `Ok(Some((message, consumed)))` on success, `Ok(None)` when the
/// buffer does not yet hold a complete message.
pub(crate) fn parse_message(
    buf: &[u8],
    role: HttpRole,
) -> Result<Option<(HttpMessage, usize)>, HttpParseError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];

    let (start, headers, header_len, bodyless) = match role {
        HttpRole::Request => {
            let mut req = httparse::Request::new(&mut header_storage);
            let header_len = match req.parse(buf).map_err(HttpParseError::Header)? {
                httparse::Status::Complete(n) => n,
                httparse::Status::Partial => return Ok(None),
            };
            let start = StartLine::Request {
                method: req.method.unwrap_or_default().to_string(),
                target: req.path.unwrap_or_default().to_string(),
            };
            (start, header_map(req.headers), header_len, false)
        }
        HttpRole::Response => {
            let mut resp = httparse::Response::new(&mut header_storage);
            let header_len = match resp.parse(buf).map_err(HttpParseError::Header)? {
                httparse::Status::Complete(n) => n,
                httparse::Status::Partial => return Ok(None),
            };
            let status = resp.code.unwrap_or_default();
            let start = StartLine::Response {
                status,
                reason: resp.reason.unwrap_or_default().to_string(),
            };
            let bodyless = status < 200 || status == 204 || status == 304;
            (start, header_map(resp.headers), header_len, bodyless)
        }
    };

    let framing = if bodyless {
        Framing::None
    } else {
        body_framing(&headers)?
    };

    let (body, consumed) = match framing {
        Framing::None => (Bytes::new(), header_len),
        Framing::Length(n) => {
            if buf.len() < header_len + n {
                return Ok(None);
            }
            (
                Bytes::copy_from_slice(&buf[header_len..header_len + n]),
                header_len + n,
            )
        }
        Framing::Chunked => match decode_chunked(&buf[header_len..])? {
            Some((decoded, n)) => (Bytes::from(decoded), header_len + n),
            None => return Ok(None),
        },
    };

    Ok(Some((
        HttpMessage {
            start,
            headers,
            body,
        },
        consumed,
    )))
}

enum Framing {
    None,
    Length(usize),
    Chunked,
}

fn body_framing(headers: &HashMap<String, String>) -> Result<Framing, HttpParseError> {
    if let Some(te) = headers.get("transfer-encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return Ok(Framing::Chunked);
        }
    }
    if let Some(cl) = headers.get("content-length") {
        let n = cl
            .trim()
            .parse::<usize>()
            .map_err(|_| HttpParseError::InvalidContentLength { value: cl.clone() })?;
        return Ok(Framing::Length(n));
    }
    Ok(Framing::None)
}

fn header_map(headers: &[httparse::Header<'_>]) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(headers.len());
    for h in headers {
        // Last occurrence wins for duplicate keys.
        map.insert(
            h.name.to_ascii_lowercase(),
            String::from_utf8_lossy(h.value).into_owned(),
        );
    }
    map
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decode a chunked body from the front of `buf`.
///
/// Returns the decoded payload and the number of raw bytes consumed, or
/// `None` when the framing is not yet complete. Trailer headers after the
/// terminal chunk are consumed and discarded.
fn decode_chunked(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, HttpParseError> {
    let mut pos = 0;
    let mut out = Vec::new();

    loop {
        let line_end = match find_crlf(&buf[pos..]) {
            Some(i) => pos + i,
            None => {
                // A chunk size line is at most 16 hex digits plus extensions.
                if buf.len() - pos > 64 {
                    return Err(HttpParseError::MalformedChunk);
                }
                return Ok(None);
            }
        };

        let line = &buf[pos..line_end];
        let size_part = line.splitn(2, |&b| b == b';').next().unwrap_or(line);
        let size_str =
            std::str::from_utf8(size_part).map_err(|_| HttpParseError::MalformedChunk)?;
        let size = usize::from_str_radix(size_str.trim(), 16)
            .map_err(|_| HttpParseError::MalformedChunk)?;
        pos = line_end + 2;

        if size == 0 {
            // Trailer section: lines until the terminating empty line.
            loop {
                let t_end = match find_crlf(&buf[pos..]) {
                    Some(i) => pos + i,
                    None => return Ok(None),
                };
                let trailer_empty = t_end == pos;
                pos = t_end + 2;
                if trailer_empty {
                    return Ok(Some((out, pos)));
                }
            }
        }

        if buf.len() < pos + size + 2 {
            return Ok(None);
        }
        out.extend_from_slice(&buf[pos..pos + size]);
        if &buf[pos + size..pos + size + 2] != b"\r\n" {
            return Err(HttpParseError::MalformedChunk);
        }
        pos += size + 2;
    }
}
