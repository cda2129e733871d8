//! HTTP/1.x wire-form messages.
//!
//! Requests and responses travel inside payload envelopes in standard
//! HTTP/1.x textual framing (request-line or status-line, headers, CRLF CRLF,
//! body). Messages are always complete in one payload, so parsing never has
//! to resume: a partial message is malformed.

use crate::error::EncodingError;
use bytes::Bytes;

/// Maximum number of headers to parse.
const MAX_HEADERS: usize = 100;

const CONTENT_LENGTH: &str = "Content-Length";

/// Ordered header map with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first header with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the first header with the given name, or appends it.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Appends a header without replacing existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Removes every header with the given name. Returns whether any matched.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// An HTTP/1.x request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    /// Minor HTTP version (the major is always 1).
    pub version: u8,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets the body and keeps `Content-Length` in sync, so that a message
    /// serializes to exactly the fields it carries.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.headers
            .set(CONTENT_LENGTH, self.body.len().to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Serializes to HTTP/1.x wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.body.len());
        buf.extend_from_slice(self.method.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.uri.as_bytes());
        buf.extend_from_slice(format!(" HTTP/1.{}\r\n", self.version).as_bytes());
        write_headers(&mut buf, &self.headers, self.body.len());
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Parses a complete request from `data`.
    pub fn parse(data: &[u8]) -> Result<Self, EncodingError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let header_len = match req.parse(data) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                return Err(EncodingError::Http("truncated request".to_string()))
            }
            Err(e) => {
                tracing::debug!("request parse error: {e}");
                return Err(EncodingError::Http(e.to_string()));
            }
        };

        Ok(Self {
            method: req.method.unwrap_or_default().to_string(),
            uri: req.path.unwrap_or_default().to_string(),
            version: req.version.unwrap_or(1),
            headers: collect_headers(req.headers)?,
            body: Bytes::copy_from_slice(&data[header_len..]),
        })
    }
}

/// An HTTP/1.x response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    /// Minor HTTP version (the major is always 1).
    pub version: u8,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets the body and keeps `Content-Length` in sync.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.headers
            .set(CONTENT_LENGTH, self.body.len().to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Serializes to HTTP/1.x wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.body.len());
        buf.extend_from_slice(
            format!("HTTP/1.{} {} {}\r\n", self.version, self.status, self.reason).as_bytes(),
        );
        write_headers(&mut buf, &self.headers, self.body.len());
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Parses a complete response from `data`.
    pub fn parse(data: &[u8]) -> Result<Self, EncodingError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);

        let header_len = match resp.parse(data) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                return Err(EncodingError::Http("truncated response".to_string()))
            }
            Err(e) => {
                tracing::debug!("response parse error: {e}");
                return Err(EncodingError::Http(e.to_string()));
            }
        };

        Ok(Self {
            status: resp.code.unwrap_or_default(),
            reason: resp.reason.unwrap_or_default().to_string(),
            version: resp.version.unwrap_or(1),
            headers: collect_headers(resp.headers)?,
            body: Bytes::copy_from_slice(&data[header_len..]),
        })
    }
}

fn write_headers(buf: &mut Vec<u8>, headers: &Headers, body_len: usize) {
    for (name, value) in headers.iter() {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    // Hand-built messages may carry a body without a length header.
    if body_len > 0 && headers.get(CONTENT_LENGTH).is_none() {
        buf.extend_from_slice(format!("{CONTENT_LENGTH}: {body_len}\r\n").as_bytes());
    }
    buf.extend_from_slice(b"\r\n");
}

fn collect_headers(parsed: &[httparse::Header<'_>]) -> Result<Headers, EncodingError> {
    let mut headers = Headers::new();
    for h in parsed {
        let value = std::str::from_utf8(h.value)
            .map_err(|_| EncodingError::Http(format!("non-utf8 value for header {}", h.name)))?;
        headers.append(h.name, value);
    }
    Ok(headers)
}

/// Canonical reason phrases for the statuses this transport emits itself.
fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}
