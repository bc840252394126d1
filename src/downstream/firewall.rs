//! Strict request firewall
//!
//! Rejects requests with disallowed methods or suspicious URL encodings
//! before they reach the wrapped downstream. Rejections carry a
//! human-readable reason; the normalizer recognizes the method rejection
//! and records it as a probe.

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response};

use super::{Downstream, DownstreamError};

pub const DEFAULT_ALLOWED_METHODS: &[&str] =
    &["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];

/// Raw and percent-encoded sequences that never appear in a legitimate path.
const MALICIOUS_SEQUENCES: &[&str] = &[";", "%3b", "%2f", "%5c", "%25", "\\", "//", "%2e"];

pub struct Firewall<D> {
    inner: D,
    allowed_methods: Vec<Method>,
}

impl<D: Downstream> Firewall<D> {
    pub fn new(inner: D) -> Self {
        Self::with_methods(inner, DEFAULT_ALLOWED_METHODS.iter().copied())
    }

    /// Methods that fail to parse are ignored.
    pub fn with_methods<I, S>(inner: D, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed_methods: Vec<Method> = methods
            .into_iter()
            .filter_map(|m| Method::from_bytes(m.as_ref().trim().to_uppercase().as_bytes()).ok())
            .collect();
        allowed_methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed_methods.dedup();
        Self {
            inner,
            allowed_methods,
        }
    }

    /// Reason the request must be rejected, if any.
    pub fn inspect(&self, method: &Method, path: &str) -> Option<String> {
        if !self.allowed_methods.contains(method) {
            let allowed: Vec<&str> = self.allowed_methods.iter().map(Method::as_str).collect();
            return Some(format!(
                "The request was rejected because the HTTP method \"{}\" was not included within the list of allowed HTTP methods [{}]",
                method,
                allowed.join(", ")
            ));
        }

        let lowered = path.to_ascii_lowercase();
        if let Some(sequence) = MALICIOUS_SEQUENCES.iter().find(|s| lowered.contains(**s)) {
            return Some(format!(
                "The request was rejected because the URL contained a potentially malicious String \"{}\"",
                sequence
            ));
        }

        if !is_normalized(path) {
            return Some("The request was rejected because the URL was not normalized.".to_string());
        }

        if path.bytes().any(|b| !(0x20..0x7f).contains(&b)) {
            return Some(
                "The request was rejected because the URL contained a non-printable character."
                    .to_string(),
            );
        }

        None
    }
}

fn is_normalized(path: &str) -> bool {
    !(path.contains("/./")
        || path.contains("/../")
        || path.ends_with("/.")
        || path.ends_with("/.."))
}

#[async_trait::async_trait]
impl<D: Downstream> Downstream for Firewall<D> {
    async fn call(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, DownstreamError> {
        if let Some(reason) = self.inspect(req.method(), req.uri().path()) {
            return Err(DownstreamError::Rejected(reason));
        }
        self.inner.call(req).await
    }
}
