//! Request parsing
//!
//! Only the request line matters: `METHOD path[?query] VERSION`. Header
//! lines after it are accepted and ignored.

use serde::Deserialize;

use crate::media::SeekHint;

/// Accepted request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Accepted protocol tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// Error type for request parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty request")]
    Empty,

    #[error("malformed request line")]
    Malformed,

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedVersion(String),

    #[error("bad query string: {0}")]
    BadQuery(String),

    #[error("bad date parameter: {0}")]
    BadDate(String),
}

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path without the leading `/`
    pub path: String,
    /// Raw query string, without the `?`
    pub query: Option<String>,
    pub version: Version,
}

impl Request {
    /// Parse a request head (everything up to and including the blank line)
    pub fn parse(head: &[u8]) -> Result<Self, ParseError> {
        let line_end = head.iter().position(|&b| b == b'\n').unwrap_or(head.len());
        let line = std::str::from_utf8(&head[..line_end]).map_err(|_| ParseError::Malformed)?;
        let line = line.trim_end_matches('\r');

        let mut parts = line.split_ascii_whitespace();
        let method = parts.next().ok_or(ParseError::Empty)?;
        let target = parts.next().ok_or(ParseError::Malformed)?;
        let version = parts.next().ok_or(ParseError::Malformed)?;
        if parts.next().is_some() {
            return Err(ParseError::Malformed);
        }

        let method = match method {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => return Err(ParseError::UnsupportedMethod(other.to_string())),
        };
        let version = match version {
            "HTTP/1.0" => Version::Http10,
            "HTTP/1.1" => Version::Http11,
            other => return Err(ParseError::UnsupportedVersion(other.to_string())),
        };

        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (target, None),
        };
        let path = path.trim_start_matches('/').to_string();

        Ok(Self {
            method,
            path,
            query,
            version,
        })
    }

    /// Where playback should start, from the `date` parameter
    pub fn seek_hint(&self) -> Result<SeekHint, ParseError> {
        match self.params()?.date {
            None => Ok(SeekHint::Live),
            Some(value) => SeekHint::parse(&value).ok_or(ParseError::BadDate(value)),
        }
    }

    fn params(&self) -> Result<QueryParams, ParseError> {
        match self.query.as_deref() {
            None => Ok(QueryParams::default()),
            Some(query) => serde_urlencoded::from_str(query)
                .map_err(|e| ParseError::BadQuery(e.to_string())),
        }
    }
}

/// Query parameters the server acts on; any others are ignored
#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    date: Option<String>,
}

/// Length of the request head if `buf` contains its terminating blank line.
///
/// Both `\n\n` and `\r\n\r\n` terminate a head.
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    for (i, &b) in buf.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        match &buf[i + 1..] {
            [b'\n', ..] => return Some(i + 2),
            [b'\r', b'\n', ..] => return Some(i + 3),
            _ => {}
        }
    }
    None
}
