//! Request head parsing.
//!
//! # Responsibilities
//! - Find the end of a request head in the connection buffer
//! - Validate the request line, header syntax and framing headers
//! - Map every rejection to the status code the client should see
//!
//! # Design Decisions
//! - The parser is pure: bytes in, [`RequestHead`] out, no I/O
//! - Limits are checked before the head is complete, so an endless head is cut off early
//! - Ambiguous framing (`Content-Length` plus `Transfer-Encoding`) is refused outright

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::http::request::{has_token, BodyKind, RequestHead, Version};

/// Why a request could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    BadRequestLine,
    #[error("invalid method token")]
    BadMethod,
    #[error("unsupported HTTP version `{0}`")]
    UnsupportedVersion(String),
    #[error("malformed header line")]
    BadHeader,
    #[error("missing Host header")]
    MissingHost,
    #[error("invalid Content-Length")]
    BadContentLength,
    #[error("unsupported Transfer-Encoding")]
    BadTransferEncoding,
    #[error("both Content-Length and Transfer-Encoding present")]
    AmbiguousLength,
    #[error("malformed chunked body")]
    BadChunk,
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
    #[error("more than {limit} headers")]
    TooManyHeaders { limit: usize },
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },
}

impl ParseError {
    /// Status code of the error response for this failure.
    pub fn status(&self) -> u16 {
        match self {
            ParseError::UnsupportedVersion(_) => 505,
            ParseError::BodyTooLarge { .. } => 413,
            ParseError::HeadTooLarge { .. } | ParseError::TooManyHeaders { .. } => 431,
            _ => 400,
        }
    }
}

/// Incremental request head parser with configured limits.
#[derive(Debug, Clone)]
pub struct HeadParser {
    max_head_bytes: usize,
    max_headers: usize,
    max_body_bytes: u64,
}

impl Default for HeadParser {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_headers: 100,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl HeadParser {
    pub fn new(max_head_bytes: usize, max_headers: usize, max_body_bytes: u64) -> Self {
        Self {
            max_head_bytes,
            max_headers,
            max_body_bytes,
        }
    }

    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_bytes
    }

    /// Parse one request head from the front of `buf`.
    ///
    /// Returns `Ok(None)` if the head is not complete yet. On success the head
    /// bytes are consumed and any body bytes stay in `buf`.
    pub fn parse(&self, buf: &mut BytesMut) -> Result<Option<RequestHead>, ParseError> {
        // Stray CRLFs between requests are tolerated.
        while buf.starts_with(b"\r\n") {
            buf.advance(2);
        }

        let Some(end) = find_head_end(buf) else {
            if buf.len() > self.max_head_bytes {
                return Err(ParseError::HeadTooLarge {
                    limit: self.max_head_bytes,
                });
            }
            return Ok(None);
        };
        if end + 4 > self.max_head_bytes {
            return Err(ParseError::HeadTooLarge {
                limit: self.max_head_bytes,
            });
        }

        let raw = buf.split_to(end + 4);
        // Header bytes are mapped one-to-one onto chars (ISO-8859-1).
        let text: String = raw[..end].iter().map(|&b| b as char).collect();
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = Vec::new();
        for line in lines {
            if headers.len() == self.max_headers {
                return Err(ParseError::TooManyHeaders {
                    limit: self.max_headers,
                });
            }
            headers.push(parse_header(line)?);
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (target.to_string(), String::new()),
        };

        let mut head = RequestHead {
            method: method.to_string(),
            target: target.to_string(),
            raw_path: path.clone(),
            path,
            query,
            version,
            headers,
            body: BodyKind::Empty,
        };

        if version == Version::Http11 && head.header("host").is_none() {
            return Err(ParseError::MissingHost);
        }
        head.body = self.body_kind(&head)?;
        Ok(Some(head))
    }

    fn body_kind(&self, head: &RequestHead) -> Result<BodyKind, ParseError> {
        let mut length: Option<u64> = None;
        for (_, value) in head.headers.iter().filter(|(n, _)| n == "content-length") {
            // A list form such as `5, 5` is accepted when every entry agrees.
            for item in value.split(',') {
                let item = item.trim();
                if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ParseError::BadContentLength);
                }
                let parsed: u64 = item.parse().map_err(|_| ParseError::BadContentLength)?;
                match length {
                    Some(existing) if existing != parsed => {
                        return Err(ParseError::BadContentLength)
                    }
                    _ => length = Some(parsed),
                }
            }
        }

        let encodings: Vec<&str> = head
            .headers
            .iter()
            .filter(|(n, _)| n == "transfer-encoding")
            .map(|(_, v)| v.as_str())
            .collect();

        if !encodings.is_empty() {
            if length.is_some() {
                return Err(ParseError::AmbiguousLength);
            }
            let chunked_only = head.version == Version::Http11
                && encodings.len() == 1
                && encodings[0].trim().eq_ignore_ascii_case("chunked");
            if !chunked_only {
                return Err(ParseError::BadTransferEncoding);
            }
            return Ok(BodyKind::Chunked);
        }

        match length {
            Some(len) if len > self.max_body_bytes => Err(ParseError::BodyTooLarge {
                limit: self.max_body_bytes,
            }),
            Some(0) | None => Ok(BodyKind::Empty),
            Some(len) => Ok(BodyKind::Length(len)),
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_request_line(line: &str) -> Result<(&str, &str, Version), ParseError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::BadRequestLine);
    };

    if !is_token(method) {
        return Err(ParseError::BadMethod);
    }
    if target.is_empty() || !target.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(ParseError::BadRequestLine);
    }
    Ok((method, target, parse_version(version)?))
}

fn parse_version(version: &str) -> Result<Version, ParseError> {
    match version {
        "HTTP/1.1" => Ok(Version::Http11),
        "HTTP/1.0" => Ok(Version::Http10),
        other => {
            let numbers = other.strip_prefix("HTTP/").and_then(|v| v.split_once('.'));
            match numbers {
                Some((major, minor))
                    if is_digits(major) && is_digits(minor) =>
                {
                    Err(ParseError::UnsupportedVersion(other.to_string()))
                }
                _ => Err(ParseError::BadRequestLine),
            }
        }
    }
}

fn parse_header(line: &str) -> Result<(String, String), ParseError> {
    let (name, value) = line.split_once(':').ok_or(ParseError::BadHeader)?;
    // Covers obs-fold continuation lines and whitespace before the colon.
    if !is_token(name) {
        return Err(ParseError::BadHeader);
    }
    let value = value.trim_matches(|c| c == ' ' || c == '\t');
    if value.chars().any(|c| c == '\0' || c == '\r' || c == '\n') {
        return Err(ParseError::BadHeader);
    }
    Ok((name.to_ascii_lowercase(), value.to_string()))
}

/// RFC 7230 `token`: one or more tchars.
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Whether the `Connection` header values in `headers` list `token`.
pub(crate) fn connection_lists(headers: &[(String, String)], token: &str) -> bool {
    headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("connection"))
        .any(|(_, v)| has_token(v, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(raw: &[u8]) -> Result<Option<RequestHead>, ParseError> {
        HeadParser::default().parse(&mut BytesMut::from(raw))
    }

    fn parse_err(raw: &[u8]) -> ParseError {
        parse(raw).unwrap_err()
    }

    #[test]
    fn parses_simple_get() {
        let head = parse(b"GET /items?page=2&sort=asc HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/items");
        assert_eq!(head.raw_path, "/items");
        assert_eq!(head.query, "page=2&sort=asc");
        assert_eq!(head.version, Version::Http11);
        assert_eq!(
            head.headers,
            vec![
                ("host".to_string(), "example.com".to_string()),
                ("user-agent".to_string(), "test".to_string()),
            ]
        );
        assert_eq!(head.body, BodyKind::Empty);
    }

    #[test]
    fn incomplete_head_waits() {
        assert_eq!(parse(b"GET / HTTP/1.1\r\nHost: a\r\n"), Ok(None));
    }

    #[test]
    fn body_bytes_stay_in_buffer() {
        let mut buf = BytesMut::from(&b"POST /echo HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello"[..]);
        let head = HeadParser::default().parse(&mut buf).unwrap().unwrap();
        assert_eq!(head.body, BodyKind::Length(5));
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn empty_query_and_leading_crlf() {
        let head = parse(b"\r\nGET /a? HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.path, "/a");
        assert_eq!(head.query, "");
        assert_eq!(head.version, Version::Http10);
    }

    #[test]
    fn duplicate_headers_keep_order() {
        let head = parse(b"GET / HTTP/1.1\r\nHost: a\r\nX-Tag: one\r\nx-tag: two\r\nAccept:\r\n\r\n")
            .unwrap()
            .unwrap();
        let tags: Vec<_> = head.headers.iter().filter(|(n, _)| n == "x-tag").map(|(_, v)| v.as_str()).collect();
        assert_eq!(tags, vec!["one", "two"]);
        assert_eq!(head.header("accept"), Some(""));
    }

    #[test]
    fn malformed_request_lines() {
        assert_eq!(parse_err(b"GARBAGE\r\n\r\n"), ParseError::BadRequestLine);
        assert_eq!(parse_err(b"GET /\r\n\r\n"), ParseError::BadRequestLine);
        assert_eq!(parse_err(b"GET / HTTP/1.1 extra\r\nHost: a\r\n\r\n"), ParseError::BadRequestLine);
        assert_eq!(parse_err(b"GET  / HTTP/1.1\r\nHost: a\r\n\r\n"), ParseError::BadRequestLine);
        assert_eq!(parse_err(b"G(T / HTTP/1.1\r\nHost: a\r\n\r\n"), ParseError::BadMethod);
        assert_eq!(parse_err(b"GET / FOO/1.1\r\n\r\n"), ParseError::BadRequestLine);
    }

    #[test]
    fn unsupported_version_is_505() {
        let err = parse_err(b"GET / HTTP/2.0\r\nHost: a\r\n\r\n");
        assert_eq!(err, ParseError::UnsupportedVersion("HTTP/2.0".into()));
        assert_eq!(err.status(), 505);
    }

    #[test]
    fn header_syntax_errors() {
        assert_eq!(parse_err(b"GET / HTTP/1.1\r\nHost: a\r\nNoColon\r\n\r\n"), ParseError::BadHeader);
        assert_eq!(parse_err(b"GET / HTTP/1.1\r\nHost : a\r\n\r\n"), ParseError::BadHeader);
        assert_eq!(parse_err(b"GET / HTTP/1.1\r\nHost: a\r\nX-A: b\r\n  folded\r\n\r\n"), ParseError::BadHeader);
    }

    #[test]
    fn host_required_for_http11_only() {
        assert_eq!(parse_err(b"GET / HTTP/1.1\r\n\r\n"), ParseError::MissingHost);
        assert!(parse(b"GET / HTTP/1.0\r\n\r\n").unwrap().is_some());
    }

    #[test]
    fn framing_header_rules() {
        assert_eq!(
            parse_err(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n"),
            ParseError::AmbiguousLength
        );
        assert_eq!(
            parse_err(b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: gzip\r\n\r\n"),
            ParseError::BadTransferEncoding
        );
        assert_eq!(
            parse_err(b"POST / HTTP/1.0\r\nTransfer-Encoding: chunked\r\n\r\n"),
            ParseError::BadTransferEncoding
        );
        assert_eq!(
            parse_err(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n"),
            ParseError::BadContentLength
        );
        assert_eq!(
            parse_err(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: -1\r\n\r\n"),
            ParseError::BadContentLength
        );
        let head = parse(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 4\r\nContent-Length: 4\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.body, BodyKind::Length(4));
        let head = parse(b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: Chunked\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.body, BodyKind::Chunked);
    }

    #[test]
    fn limits_map_to_statuses() {
        let parser = HeadParser::new(1024, 2, 10);

        let err = parser
            .parse(&mut BytesMut::from(&b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 11\r\n\r\n"[..]))
            .unwrap_err();
        assert_eq!(err.status(), 413);

        let err = parser
            .parse(&mut BytesMut::from(&b"GET / HTTP/1.1\r\nHost: a\r\nA: 1\r\nB: 2\r\n\r\n"[..]))
            .unwrap_err();
        assert_eq!(err, ParseError::TooManyHeaders { limit: 2 });
        assert_eq!(err.status(), 431);

        let mut endless = BytesMut::from(&b"GET / HTTP/1.1\r\nX-Long: "[..]);
        endless.extend_from_slice(&[b'a'; 2048]);
        let err = parser.parse(&mut endless).unwrap_err();
        assert_eq!(err.status(), 431);
    }

    proptest! {
        #[test]
        fn declared_length_is_reported(len in 0u64..1_000_000) {
            let raw = format!("PUT /x HTTP/1.1\r\nHost: h\r\nContent-Length: {len}\r\n\r\n");
            let head = parse(raw.as_bytes()).unwrap().unwrap();
            let expected = if len == 0 { BodyKind::Empty } else { BodyKind::Length(len) };
            prop_assert_eq!(head.body, expected);
        }

        #[test]
        fn parser_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse(&raw);
        }
    }
}
