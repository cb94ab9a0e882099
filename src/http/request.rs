//! Parsed request heads and incremental body decoding.
//!
//! # Responsibilities
//! - Represent the request line and header list of one exchange
//! - Decide keep-alive eligibility from version and `Connection`
//! - Decode `Content-Length` and chunked bodies piece by piece
//!
//! # Design Decisions
//! - Bodies are never buffered whole; each decode step yields what is available
//! - The body limit is enforced while decoding, not after

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};

use crate::http::codec::ParseError;

/// Longest accepted chunk-size line, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

/// Upper bound for the trailer section after the last chunk.
const MAX_TRAILER_BYTES: usize = 16 * 1024;

/// HTTP protocol version of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Version number without the `HTTP/` prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "1.0",
            Version::Http11 => "1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}", self.as_str())
    }
}

/// How the length of a request body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
}

/// Request line and headers of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Request target exactly as received.
    pub target: String,
    pub path: String,
    pub raw_path: String,
    /// Query component without the leading `?`; empty when absent.
    pub query: String,
    pub version: Version,
    /// Lowercased names, wire order, duplicates kept.
    pub headers: Vec<(String, String)>,
    pub body: BodyKind,
}

impl RequestHead {
    /// First value of the header `name` (lowercase).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether any `Connection` header lists `token`.
    pub fn connection_has(&self, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(n, _)| n == "connection")
            .any(|(_, v)| has_token(v, token))
    }

    /// Keep-alive eligibility: HTTP/1.1 unless `close`, HTTP/1.0 only with `keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !self.connection_has("close"),
            Version::Http10 => self.connection_has("keep-alive") && !self.connection_has("close"),
        }
    }

    pub fn expects_continue(&self) -> bool {
        self.version == Version::Http11
            && self
                .header("expect")
                .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
}

/// Whether a comma-separated header value contains `token` (case-insensitive).
pub(crate) fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// One decoded piece of a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyChunk {
    pub data: Bytes,
    /// No further body bytes follow.
    pub last: bool,
}

#[derive(Debug)]
enum DecodeState {
    Length { remaining: u64 },
    Chunked(ChunkPhase),
    Done,
}

#[derive(Debug, Clone, Copy)]
enum ChunkPhase {
    SizeLine,
    Data { remaining: u64 },
    DataCrlf,
    Trailers { seen: usize },
}

/// Incremental decoder for one request body.
#[derive(Debug)]
pub struct BodyDecoder {
    state: DecodeState,
    received: u64,
    limit: u64,
}

impl BodyDecoder {
    pub fn new(kind: BodyKind, limit: u64) -> Self {
        let state = match kind {
            BodyKind::Empty => DecodeState::Length { remaining: 0 },
            BodyKind::Length(len) => DecodeState::Length { remaining: len },
            BodyKind::Chunked => DecodeState::Chunked(ChunkPhase::SizeLine),
        };
        Self {
            state,
            received: 0,
            limit,
        }
    }

    /// The final chunk has been produced.
    pub fn is_done(&self) -> bool {
        matches!(self.state, DecodeState::Done)
    }

    /// Body bytes produced so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Decode the next piece of body from `buf`, consuming what it uses.
    ///
    /// Returns `Ok(None)` when more input is needed. Once the last chunk was
    /// returned, further calls keep returning an empty last chunk.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BodyChunk>, ParseError> {
        match &mut self.state {
            DecodeState::Done => Ok(Some(BodyChunk {
                data: Bytes::new(),
                last: true,
            })),
            DecodeState::Length { remaining } => {
                if *remaining == 0 {
                    self.state = DecodeState::Done;
                    return Ok(Some(BodyChunk {
                        data: Bytes::new(),
                        last: true,
                    }));
                }
                if buf.is_empty() {
                    return Ok(None);
                }
                let take = (*remaining).min(buf.len() as u64) as usize;
                *remaining -= take as u64;
                let last = *remaining == 0;
                self.received += take as u64;
                if last {
                    self.state = DecodeState::Done;
                }
                Ok(Some(BodyChunk {
                    data: buf.split_to(take).freeze(),
                    last,
                }))
            }
            DecodeState::Chunked(phase) => {
                let result = decode_chunked(phase, buf, self.received, self.limit)?;
                if let Some(chunk) = &result {
                    self.received += chunk.data.len() as u64;
                    if chunk.last {
                        self.state = DecodeState::Done;
                    }
                }
                Ok(result)
            }
        }
    }
}

fn decode_chunked(
    phase: &mut ChunkPhase,
    buf: &mut BytesMut,
    received: u64,
    limit: u64,
) -> Result<Option<BodyChunk>, ParseError> {
    loop {
        match *phase {
            ChunkPhase::SizeLine => {
                let Some(line) = take_line(buf, MAX_CHUNK_LINE)? else {
                    return Ok(None);
                };
                let size = parse_chunk_size(&line)?;
                if size == 0 {
                    *phase = ChunkPhase::Trailers { seen: 0 };
                    continue;
                }
                if received.saturating_add(size) > limit {
                    return Err(ParseError::BodyTooLarge { limit });
                }
                *phase = ChunkPhase::Data { remaining: size };
            }
            ChunkPhase::Data { remaining } => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let take = remaining.min(buf.len() as u64) as usize;
                let left = remaining - take as u64;
                *phase = if left == 0 {
                    ChunkPhase::DataCrlf
                } else {
                    ChunkPhase::Data { remaining: left }
                };
                return Ok(Some(BodyChunk {
                    data: buf.split_to(take).freeze(),
                    last: false,
                }));
            }
            ChunkPhase::DataCrlf => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                if &buf[..2] != b"\r\n" {
                    return Err(ParseError::BadChunk);
                }
                buf.advance(2);
                *phase = ChunkPhase::SizeLine;
            }
            ChunkPhase::Trailers { seen } => {
                let Some(line) = take_line(buf, MAX_TRAILER_BYTES)? else {
                    return Ok(None);
                };
                if line.is_empty() {
                    return Ok(Some(BodyChunk {
                        data: Bytes::new(),
                        last: true,
                    }));
                }
                let seen = seen + line.len() + 2;
                if seen > MAX_TRAILER_BYTES || !line.contains(&b':') {
                    return Err(ParseError::BadChunk);
                }
                // Trailer fields are not forwarded to the application.
                *phase = ChunkPhase::Trailers { seen };
            }
        }
    }
}

/// Split one CRLF-terminated line off `buf`, without the terminator.
fn take_line(buf: &mut BytesMut, max: usize) -> Result<Option<BytesMut>, ParseError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(end) if end > max => Err(ParseError::BadChunk),
        Some(end) => {
            let line = buf.split_to(end);
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > max => Err(ParseError::BadChunk),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::BadChunk)?;
    let size = line.split(';').next().unwrap_or("").trim();
    if size.is_empty() || size.len() > 16 || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::BadChunk);
    }
    u64::from_str_radix(size, 16).map_err(|_| ParseError::BadChunk)
}
