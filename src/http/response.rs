//! Response serialization.
//!
//! # Responsibilities
//! - Turn `http.response.start` / `http.response.body` events into wire bytes
//! - Enforce event ordering for one exchange
//! - Pick the body framing and mirror the keep-alive decision
//!
//! # Design Decisions
//! - The head is held back until the first body event, so a single-event body
//!   gets an exact `Content-Length` instead of chunked framing
//! - HTTP/1.0 peers never see chunked framing; unknown lengths close the connection

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::app::{OutboundEvent, ProtocolViolation, ScopeKind};
use crate::http::codec::{connection_lists, is_token};
use crate::http::request::Version;

/// Interim response written before the application reads an `Expect: 100-continue` body.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// How the response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Length(u64),
    Chunked,
    /// Body ends when the connection closes.
    CloseDelimited,
    /// Status forbids a body (1xx, 204, 304).
    NoBody,
}

#[derive(Debug)]
enum EncodeState {
    Idle,
    HeadPending {
        status: u16,
        headers: Vec<(String, String)>,
    },
    Streaming {
        framing: Framing,
        sent: u64,
    },
    Complete,
}

/// Serializer for the response of one exchange.
#[derive(Debug)]
pub struct ResponseEncoder {
    version: Version,
    head_request: bool,
    keep_alive: bool,
    status: Option<u16>,
    state: EncodeState,
}

impl ResponseEncoder {
    pub fn new(version: Version, head_request: bool, keep_alive: bool) -> Self {
        Self {
            version,
            head_request,
            keep_alive,
            status: None,
            state: EncodeState::Idle,
        }
    }

    /// Keep-alive decision after the application's headers were taken into account.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Announce `connection: close`. Has no effect once the head was written.
    pub fn disable_keep_alive(&mut self) {
        if !self.head_written() {
            self.keep_alive = false;
        }
    }

    /// Status sent by the application, once `http.response.start` was accepted.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// `http.response.start` was accepted.
    pub fn started(&self) -> bool {
        !matches!(self.state, EncodeState::Idle)
    }

    /// Some response bytes were produced.
    pub fn head_written(&self) -> bool {
        matches!(
            self.state,
            EncodeState::Streaming { .. } | EncodeState::Complete
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, EncodeState::Complete)
    }

    /// Apply one outbound event, appending any wire bytes to `dst`.
    ///
    /// On error nothing has been appended to `dst`.
    pub fn encode(&mut self, event: OutboundEvent, dst: &mut BytesMut) -> Result<(), ProtocolViolation> {
        match event {
            OutboundEvent::HttpResponseStart { status, headers } => self.start(status, headers),
            OutboundEvent::HttpResponseBody { body, more_body } => self.body(body, more_body, dst),
            other => Err(ProtocolViolation::UnexpectedEvent {
                event: other.kind(),
                scope: ScopeKind::Http,
            }),
        }
    }

    fn start(&mut self, status: u16, headers: Vec<(String, String)>) -> Result<(), ProtocolViolation> {
        match self.state {
            EncodeState::Idle => {}
            EncodeState::Complete => return Err(ProtocolViolation::AfterComplete),
            _ => return Err(ProtocolViolation::DuplicateStart),
        }
        if !(100..=599).contains(&status) {
            return Err(ProtocolViolation::InvalidStatus(status));
        }
        for (name, value) in &headers {
            let bad_char = |c: char| matches!(c, '\r' | '\n' | '\0') || u32::from(c) > 0xFF;
            if !is_token(name) || value.chars().any(bad_char) {
                return Err(ProtocolViolation::InvalidHeader(name.clone()));
            }
        }
        self.status = Some(status);
        self.state = EncodeState::HeadPending { status, headers };
        Ok(())
    }

    fn body(&mut self, body: Bytes, more_body: bool, dst: &mut BytesMut) -> Result<(), ProtocolViolation> {
        match std::mem::replace(&mut self.state, EncodeState::Complete) {
            EncodeState::Idle => {
                self.state = EncodeState::Idle;
                Err(ProtocolViolation::BodyBeforeStart)
            }
            EncodeState::Complete => Err(ProtocolViolation::AfterComplete),
            EncodeState::HeadPending { status, headers } => {
                let framing = match self.choose_framing(status, &headers, &body, more_body) {
                    Ok(framing) => framing,
                    Err(violation) => {
                        self.state = EncodeState::HeadPending { status, headers };
                        return Err(violation);
                    }
                };
                if let (Framing::Length(declared), false) = (framing, self.head_request) {
                    let actual = body.len() as u64;
                    if actual > declared || (!more_body && actual != declared) {
                        self.state = EncodeState::HeadPending { status, headers };
                        return Err(ProtocolViolation::ContentLengthMismatch { declared, actual });
                    }
                }
                self.write_head(status, &headers, framing, dst);
                self.write_body(framing, 0, body, more_body, dst)
            }
            EncodeState::Streaming { framing, sent } => {
                self.write_body(framing, sent, body, more_body, dst)
            }
        }
    }

    /// Decide the framing and settle keep-alive from the application's headers.
    fn choose_framing(
        &mut self,
        status: u16,
        headers: &[(String, String)],
        body: &Bytes,
        more_body: bool,
    ) -> Result<Framing, ProtocolViolation> {
        let mut declared: Option<u64> = None;
        let mut chunked = false;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("content-length") {
                let parsed = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ProtocolViolation::InvalidHeader(name.clone()))?;
                if declared.is_some_and(|d| d != parsed) {
                    return Err(ProtocolViolation::InvalidHeader(name.clone()));
                }
                declared = Some(parsed);
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                if !value.trim().eq_ignore_ascii_case("chunked") {
                    return Err(ProtocolViolation::InvalidHeader(name.clone()));
                }
                chunked = true;
            }
        }
        if chunked && declared.is_some() {
            return Err(ProtocolViolation::InvalidHeader("transfer-encoding".into()));
        }

        if connection_lists(headers, "close") {
            self.keep_alive = false;
        }

        let framing = if status < 200 || status == 204 || status == 304 {
            Framing::NoBody
        } else if let Some(len) = declared {
            Framing::Length(len)
        } else if !more_body && !chunked {
            Framing::Length(body.len() as u64)
        } else if self.version == Version::Http11 {
            Framing::Chunked
        } else {
            Framing::CloseDelimited
        };
        if framing == Framing::CloseDelimited {
            self.keep_alive = false;
        }
        Ok(framing)
    }

    fn write_head(&self, status: u16, headers: &[(String, String)], framing: Framing, dst: &mut BytesMut) {
        let _ = write!(dst, "HTTP/1.1 {} {}\r\n", status, reason_phrase(status));
        // Framing and connection headers are regenerated from the decisions made above.
        let regenerated = ["connection", "content-length", "transfer-encoding"];
        for (name, value) in headers {
            if regenerated.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            put_latin1(dst, name);
            dst.put_slice(b": ");
            put_latin1(dst, value);
            dst.put_slice(b"\r\n");
        }
        match framing {
            Framing::Length(len) => {
                let _ = write!(dst, "content-length: {len}\r\n");
            }
            Framing::Chunked => dst.put_slice(b"transfer-encoding: chunked\r\n"),
            Framing::CloseDelimited | Framing::NoBody => {}
        }
        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        let _ = write!(dst, "connection: {connection}\r\n\r\n");
    }

    fn write_body(
        &mut self,
        framing: Framing,
        sent: u64,
        body: Bytes,
        more_body: bool,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolViolation> {
        let sent_now = sent + body.len() as u64;
        // A HEAD response may announce the length of a body it never carries.
        if let (Framing::Length(declared), false) = (framing, self.head_request) {
            if sent_now > declared || (!more_body && sent_now != declared) {
                self.state = EncodeState::Complete;
                return Err(ProtocolViolation::ContentLengthMismatch {
                    declared,
                    actual: sent_now,
                });
            }
        }

        let on_wire = !self.head_request;
        match framing {
            Framing::Length(_) | Framing::CloseDelimited if on_wire => dst.put_slice(&body),
            Framing::Chunked if on_wire => {
                if !body.is_empty() {
                    let _ = write!(dst, "{:x}\r\n", body.len());
                    dst.put_slice(&body);
                    dst.put_slice(b"\r\n");
                }
                if !more_body {
                    dst.put_slice(b"0\r\n\r\n");
                }
            }
            _ => {}
        }

        self.state = if more_body {
            EncodeState::Streaming {
                framing,
                sent: sent_now,
            }
        } else {
            EncodeState::Complete
        };
        Ok(())
    }
}

/// Header text goes out as ISO-8859-1, matching how request heads are decoded.
fn put_latin1(dst: &mut BytesMut, text: &str) {
    dst.extend(text.chars().map(|c| c as u8));
}

/// Canonical reason phrase for `status`.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        417 => "Expectation Failed",
        422 => "Unprocessable Entity",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

/// Complete plain-text error response that closes the connection.
pub fn error_response(status: u16) -> Bytes {
    let reason = reason_phrase(status);
    let mut buf = BytesMut::with_capacity(128);
    let _ = write!(
        buf,
        "HTTP/1.1 {status} {reason}\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reason}",
        reason.len()
    );
    buf.freeze()
}
