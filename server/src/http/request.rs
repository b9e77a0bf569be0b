//! Incremental HTTP/1.x request parsing.
//!
//! The parser is a small state machine over
//! {request line, headers, body, complete, malformed}. It consumes the
//! connection's read buffer line-by-line (length-delimited for the body)
//! and never blocks: when the current state needs bytes that have not
//! arrived yet it suspends with `ParseStatus::NeedMore`.

use bytes::{Buf, BytesMut};

use crate::http::response::Status;

/// Hard cap on a single request or header line.
const MAX_LINE: usize = 8192;
/// Hard cap on the number of headers per request.
const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    fn parse(token: &str) -> Option<Method> {
        match token {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// A fully parsed request.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request target without its query string.
    pub fn path(&self) -> &str {
        match self.target.find('?') {
            Some(idx) => &self.target[..idx],
            None => &self.target,
        }
    }

    /// Whether the connection should stay open after the response.
    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 must opt in.
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version == Version::Http11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Body,
    Complete,
    Malformed,
}

/// Result of driving the parser over the currently buffered bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// The buffered bytes end mid-request; wait for more.
    NeedMore,
    /// A full request is parsed; collect it with `take_request`.
    Complete,
    /// The request cannot be parsed; respond with the given status (if the
    /// connection is still intact) and close.
    Malformed(Status),
}

/// Incremental request parser, one per connection. Reusable across
/// requests on a keep-alive connection via `take_request`.
pub struct RequestParser {
    state: State,
    max_body: usize,
    method: Method,
    target: String,
    version: Version,
    headers: Vec<(String, String)>,
    content_length: usize,
    body: Vec<u8>,
    reject: Status,
}

impl RequestParser {
    pub fn new(max_body: usize) -> Self {
        RequestParser {
            state: State::RequestLine,
            max_body,
            method: Method::Get,
            target: String::new(),
            version: Version::Http11,
            headers: Vec::new(),
            content_length: 0,
            body: Vec::new(),
            reject: Status::BadRequest,
        }
    }

    /// Drive the state machine over `buf`, consuming what it can.
    pub fn advance(&mut self, buf: &mut BytesMut) -> ParseStatus {
        loop {
            match self.state {
                State::RequestLine => {
                    let line = match self.take_line(buf) {
                        Ok(Some(line)) => line,
                        Ok(None) => return ParseStatus::NeedMore,
                        Err(status) => return self.fail(status),
                    };
                    // Tolerate a stray blank line before the request line.
                    if line.is_empty() {
                        continue;
                    }
                    if let Err(status) = self.parse_request_line(&line) {
                        return self.fail(status);
                    }
                    self.state = State::Headers;
                }
                State::Headers => {
                    let line = match self.take_line(buf) {
                        Ok(Some(line)) => line,
                        Ok(None) => return ParseStatus::NeedMore,
                        Err(status) => return self.fail(status),
                    };
                    if line.is_empty() {
                        match self.parse_content_length() {
                            Ok(len) => self.content_length = len,
                            Err(status) => return self.fail(status),
                        }
                        self.state = if self.content_length > 0 {
                            State::Body
                        } else {
                            State::Complete
                        };
                        continue;
                    }
                    if self.headers.len() >= MAX_HEADERS {
                        return self.fail(Status::BadRequest);
                    }
                    match line.split_once(':') {
                        Some((name, value)) if !name.trim().is_empty() => {
                            self.headers
                                .push((name.trim().to_string(), value.trim().to_string()));
                        }
                        _ => return self.fail(Status::BadRequest),
                    }
                }
                State::Body => {
                    let needed = self.content_length - self.body.len();
                    let take = needed.min(buf.len());
                    self.body.extend_from_slice(&buf[..take]);
                    buf.advance(take);
                    if self.body.len() < self.content_length {
                        return ParseStatus::NeedMore;
                    }
                    self.state = State::Complete;
                }
                State::Complete => return ParseStatus::Complete,
                State::Malformed => return ParseStatus::Malformed(self.reject),
            }
        }
    }

    /// Force the parser into the malformed state, e.g. when the read
    /// buffer ceiling is exceeded before a request completes.
    pub fn poison(&mut self, status: Status) {
        self.state = State::Malformed;
        self.reject = status;
    }

    /// Collect the completed request and reset for the next one.
    ///
    /// Returns `None` unless the parser is in the complete state.
    pub fn take_request(&mut self) -> Option<Request> {
        if self.state != State::Complete {
            return None;
        }
        let request = Request {
            method: self.method,
            target: std::mem::take(&mut self.target),
            version: self.version,
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
        };
        self.state = State::RequestLine;
        self.content_length = 0;
        Some(request)
    }

    fn fail(&mut self, status: Status) -> ParseStatus {
        self.poison(status);
        ParseStatus::Malformed(status)
    }

    /// Pop one `\r\n`-terminated line off the buffer. `Ok(None)` means the
    /// terminator has not arrived yet; an over-long line is malformed.
    fn take_line(&self, buf: &mut BytesMut) -> Result<Option<String>, Status> {
        let Some(idx) = buf.iter().position(|&b| b == b'\n') else {
            if buf.len() > MAX_LINE {
                return Err(Status::BadRequest);
            }
            return Ok(None);
        };
        if idx > MAX_LINE {
            return Err(Status::BadRequest);
        }
        let mut line = buf.split_to(idx + 1);
        line.truncate(idx);
        if line.last() == Some(&b'\r') {
            line.truncate(idx - 1);
        }
        match std::str::from_utf8(&line) {
            Ok(s) => Ok(Some(s.to_string())),
            Err(_) => Err(Status::BadRequest),
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), Status> {
        let mut parts = line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) if parts.next().is_none() => (m, t, v),
            _ => return Err(Status::BadRequest),
        };

        self.method = Method::parse(method).ok_or(Status::BadRequest)?;

        if !target.starts_with('/') {
            return Err(Status::BadRequest);
        }
        self.target = target.to_string();

        self.version = match version {
            "HTTP/1.0" => Version::Http10,
            "HTTP/1.1" => Version::Http11,
            v if v.starts_with("HTTP/") => return Err(Status::VersionNotSupported),
            _ => return Err(Status::BadRequest),
        };
        Ok(())
    }

    fn parse_content_length(&self) -> Result<usize, Status> {
        let Some((_, value)) = self
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        else {
            return Ok(0);
        };
        let len: usize = value.trim().parse().map_err(|_| Status::BadRequest)?;
        if len > self.max_body {
            return Err(Status::PayloadTooLarge);
        }
        Ok(len)
    }
}
