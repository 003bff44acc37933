//! Minimal pseudo-HTTP framing for the directory protocol.
//! Only what the channel peers exchange: a status line, a few headers, and request header lookup.

use std::fmt::Write as _;

/// Exact not-found reply the peer expects. No body message follows it.
pub const NOT_FOUND: &[u8] = b"HTTP/1.1 404 not found\r\n\r\n\r\n";

const MAX_HEADERS: usize = 32;

/// Status line plus header block. The body, if any, travels as a separate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
}

impl ResponseHead {
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn not_modified() -> Self {
        Self::new(304, "Not Modified")
    }

    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

/// Request line target and headers of a complete request, parsed with httparse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse the request line and headers. `None` unless the head is complete and well formed.
pub fn parse_request_head(buf: &[u8]) -> Option<RequestHead> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let status = req.parse(buf).ok()?;
    if !status.is_complete() {
        return None;
    }
    let method = req.method?.to_string();
    let target = req.path?.to_string();
    let headers = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect();
    Some(RequestHead {
        method,
        target,
        headers,
    })
}

/// Find `name: value` in loosely formatted text, for requests httparse refuses.
pub fn find_header_loose<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.split("\r\n").find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}
