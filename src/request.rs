//! Request summary shared by filters, the normalizer and log lines

use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;

use hyper::header::{ACCEPT, REFERER, USER_AGENT};
use hyper::http::request::Parts;
use hyper::HeaderMap;
use urlencoding::decode;

/// The parts of an inbound request the gatekeeper inspects.
///
/// Captured once before the request is handed downstream, so failures
/// can still be attributed to the client after the body is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub ip: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub user_agent: String,
    pub referer: String,
    pub accept: String,
}

impl RequestInfo {
    pub fn from_parts(parts: &Parts, remote_addr: SocketAddr) -> Self {
        Self {
            ip: remote_addr.ip().to_canonical().to_string(),
            method: parts.method.as_str().to_string(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            user_agent: header_value(&parts.headers, USER_AGENT),
            referer: header_value(&parts.headers, REFERER),
            accept: header_value(&parts.headers, ACCEPT),
        }
    }

    /// Path plus query string, as the client sent it.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }
}

/// Percent-decoded form of `value`, as the application behind the
/// gatekeeper will see it. Falls back to `value` when the escapes do not
/// decode to UTF-8.
pub fn percent_decoded(value: &str) -> Cow<'_, str> {
    decode(value).unwrap_or(Cow::Borrowed(value))
}

fn header_value(headers: &HeaderMap, name: hyper::header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

impl fmt::Display for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} (user-agent: {:?}, referer: {:?})",
            self.ip,
            self.method,
            self.full_url(),
            self.user_agent,
            self.referer
        )
    }
}
