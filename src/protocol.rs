//! HTTP/1.1 subset parser and response generator.
//!
//! Supports a single request per connection:
//! - Request line: `<method> <target> <version>`
//! - Headers: `Name: Value` lines, looked up case-insensitively
//! - Body: framed by `Content-Length` when present
//!
//! No chunked transfer encoding, no keep-alive, no pipelining.

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::str;
use tracing::debug;

/// Protocol version emitted on every response
pub const HTTP_VERSION: &str = "HTTP/1.1";

const CRLF: &[u8] = b"\r\n";
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const HEADER_SEPARATOR: &str = ": ";

/// Header mapping with case-insensitive names.
///
/// Names are lowercased on insertion and lookup. Values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any previous value for the same name
    pub fn insert(&mut self, name: &str, value: &str) {
        self.inner
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

}

/// Parsed request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    pub body: Bytes,
}

/// Protocol parsing errors
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Request line or header block does not follow the framing rules
    Malformed(String),
    /// Fewer body bytes arrived than `Content-Length` declared
    TruncatedBody { declared: usize, available: usize },
    /// Request grew past the configured size limit
    TooLarge(usize),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Malformed(msg) => write!(f, "Malformed request: {}", msg),
            ParseError::TruncatedBody {
                declared,
                available,
            } => write!(
                f,
                "Truncated body: declared {} bytes, received {}",
                declared, available
            ),
            ParseError::TooLarge(limit) => {
                write!(f, "Request exceeds the {} byte limit", limit)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Result of parsing a buffer
#[derive(Debug)]
pub enum ParseResult {
    /// Successfully parsed request with bytes consumed
    Complete(Request, usize),
    /// Header terminator not received yet
    Incomplete,
    /// Head is complete but the declared body has not fully arrived
    NeedData { head_bytes: usize, body_bytes: usize },
    /// Parse error
    Error(ParseError),
}

/// Parser for the HTTP/1.1 subset
pub struct Parser;

impl Parser {
    /// Parse a request from the buffer
    pub fn parse(buffer: &[u8]) -> ParseResult {
        let head_end = match find(buffer, HEAD_TERMINATOR) {
            Some(pos) => pos,
            None => return ParseResult::Incomplete,
        };
        let head_bytes = head_end + HEAD_TERMINATOR.len();

        let head = match str::from_utf8(&buffer[..head_end]) {
            Ok(s) => s,
            Err(_) => return malformed("invalid UTF-8 in request head"),
        };

        let (request_line, header_block) = match head.split_once("\r\n") {
            Some((line, rest)) => (line, Some(rest)),
            None => (head, None),
        };

        let (method, target, version) = match Self::parse_request_line(request_line) {
            Ok(parts) => parts,
            Err(e) => return ParseResult::Error(e),
        };

        let headers = match header_block.map(Self::parse_headers).transpose() {
            Ok(headers) => headers.unwrap_or_default(),
            Err(e) => return ParseResult::Error(e),
        };

        let region = &buffer[head_bytes..];
        let body_bytes = match headers.get("content-length") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(len) => len,
                Err(_) => return malformed(&format!("invalid content-length {:?}", value)),
            },
            None => {
                debug!(uri = %target, "content-length not set, taking the buffered body");
                region.len()
            }
        };

        if region.len() < body_bytes {
            return ParseResult::NeedData {
                head_bytes,
                body_bytes,
            };
        }

        let request = Request {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
            body: Bytes::copy_from_slice(&region[..body_bytes]),
        };

        ParseResult::Complete(request, head_bytes + body_bytes)
    }

    fn parse_request_line(line: &str) -> Result<(&str, &str, &str), ParseError> {
        let parts: Vec<&str> = line.split(' ').collect();
        match parts.as_slice() {
            [method, target, version]
                if !method.is_empty() && !target.is_empty() && !version.is_empty() =>
            {
                Ok((*method, *target, *version))
            }
            _ => Err(ParseError::Malformed(format!(
                "request line {:?} is not `<method> <target> <version>`",
                line
            ))),
        }
    }

    fn parse_headers(block: &str) -> Result<Headers, ParseError> {
        let mut headers = Headers::new();
        for line in block.split("\r\n") {
            let (name, value) = line.split_once(HEADER_SEPARATOR).ok_or_else(|| {
                ParseError::Malformed(format!("header line {:?} has no separator", line))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Parse a request from a buffer that holds everything the peer sent.
///
/// A missing header terminator is malformed and a short body is truncated,
/// since no further bytes can arrive.
pub fn parse_request(buffer: &[u8]) -> Result<Request, ParseError> {
    match Parser::parse(buffer) {
        ParseResult::Complete(request, _) => Ok(request),
        ParseResult::Incomplete => Err(ParseError::Malformed(
            "missing header terminator".to_string(),
        )),
        ParseResult::NeedData {
            head_bytes,
            body_bytes,
        } => Err(ParseError::TruncatedBody {
            declared: body_bytes,
            available: buffer.len() - head_bytes,
        }),
        ParseResult::Error(e) => Err(e),
    }
}

fn malformed(msg: &str) -> ParseResult {
    ParseResult::Error(ParseError::Malformed(msg.to_string()))
}

/// Response status codes produced by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Created,
    NotFound,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Created => "Created",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

/// Response with headers in emission order
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    /// Build a response.
    ///
    /// `Content-Type: text/plain` and `Content-Length` are applied first. An
    /// override with the same name replaces the default; other overrides are
    /// appended in order.
    pub fn new(status: Status, body: impl Into<Bytes>, overrides: &[(&str, &str)]) -> Self {
        let body = body.into();
        let mut headers = vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ];

        for (name, value) in overrides {
            match headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some(slot) => *slot = (name.to_string(), value.to_string()),
                None => headers.push((name.to_string(), value.to_string())),
            }
        }

        Response {
            status,
            headers,
            body,
        }
    }

    /// Empty-bodied response with default headers
    pub fn empty(status: Status) -> Self {
        Self::new(status, Bytes::new(), &[])
    }

    /// Look up an emitted header by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replace the body with an encoded form and fix up the framing headers
    pub fn with_encoded_body(mut self, encoding: &str, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        let length = self.body.len().to_string();
        self.set_header("Content-Encoding", encoding);
        self.set_header("Content-Length", &length);
        self
    }

    fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, slot)) => *slot = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Serialize into wire format
    pub fn serialize(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(64 + self.body.len());
        out.extend_from_slice(
            format!(
                "{} {} {}\r\n",
                HTTP_VERSION,
                self.status.code(),
                self.status.reason()
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(CRLF);
        out.extend_from_slice(&self.body);
        out
    }
}

/// Find `needle` in buffer, returning its start position
fn find(buffer: &[u8], needle: &[u8]) -> Option<usize> {
    buffer
        .windows(needle.len())
        .position(|window| window == needle)
}
