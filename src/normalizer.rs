//! Downstream error normalization
//!
//! Every failure raised while handling an admitted request is classified
//! and answered with a minimal, generic response. Details go to the log,
//! never into the response body.

use std::io;
use std::sync::LazyLock;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::downstream::DownstreamError;
use crate::recorder::ViolationRecorder;
use crate::request::RequestInfo;
use crate::response;

/// Category recorded when a client probes with a disallowed HTTP method.
pub const METHOD_PROBE_CATEGORY: &str = "malicious HTTP Method test";

pub const DEFAULT_ERROR_PAGE: &str = "/error";

static METHOD_REJECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^The request was rejected because the HTTP method ".+?" was not included within the list of allowed HTTP methods.+?$"#,
    )
    .expect("method rejection pattern")
});

/// How a downstream failure is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ClientAbort,
    RejectedRequest,
    /// Rejection or construction failure inside a nested invocation
    WrappedRejection,
    /// Any other failure inside a nested invocation
    WrappedFailure,
    /// Broken pipe or peer reset
    TransportReset,
    /// Any other I/O failure
    TransportFailure,
    Unclassified,
}

impl FailureKind {
    pub fn classify(err: &DownstreamError) -> Self {
        match err {
            DownstreamError::ClientAbort(_) => FailureKind::ClientAbort,
            DownstreamError::Rejected(_) => FailureKind::RejectedRequest,
            DownstreamError::Nested { source } => match source.as_ref() {
                DownstreamError::Rejected(_) | DownstreamError::HandlerConstruction(_) => {
                    FailureKind::WrappedRejection
                }
                _ => FailureKind::WrappedFailure,
            },
            DownstreamError::Io(e) if is_transport_reset(e) => FailureKind::TransportReset,
            DownstreamError::Io(_) => FailureKind::TransportFailure,
            DownstreamError::HandlerConstruction(_) | DownstreamError::Internal(_) => {
                FailureKind::Unclassified
            }
        }
    }
}

fn is_transport_reset(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    ) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("broken pipe") || message.contains("connection reset by peer")
}

/// Reason text of a direct or nested platform rejection.
fn rejection_reason(err: &DownstreamError) -> Option<&str> {
    match err {
        DownstreamError::Rejected(reason) => Some(reason),
        DownstreamError::Nested { source } => match source.as_ref() {
            DownstreamError::Rejected(reason) => Some(reason),
            _ => None,
        },
        _ => None,
    }
}

/// Whether a rejection reason describes a disallowed HTTP method.
pub fn is_method_rejection(reason: &str) -> bool {
    METHOD_REJECTION.is_match(reason)
}

pub struct ErrorNormalizer {
    recorder: ViolationRecorder,
    error_page: String,
}

impl ErrorNormalizer {
    pub fn new(recorder: ViolationRecorder, error_page: impl Into<String>) -> Self {
        Self {
            recorder,
            error_page: error_page.into(),
        }
    }

    /// Absorbs `err` and produces the response for `req`.
    pub fn normalize(&self, err: DownstreamError, req: &RequestInfo) -> Response<Full<Bytes>> {
        match FailureKind::classify(&err) {
            FailureKind::ClientAbort | FailureKind::TransportReset => {
                debug!(request = %req, reason = %err, "Client went away");
                response::rejected()
            }
            FailureKind::RejectedRequest | FailureKind::WrappedRejection => {
                if rejection_reason(&err).is_some_and(is_method_rejection) {
                    self.recorder.record(METHOD_PROBE_CATEGORY, req.ip.clone());
                }
                debug!(request = %req, reason = %err, "Request rejected");
                response::rejected()
            }
            FailureKind::WrappedFailure => {
                warn!(request = %req, reason = %err, "Nested handler failure");
                response::internal_error()
            }
            FailureKind::TransportFailure => {
                info!(request = %req, reason = %err, "I/O failure");
                error!(error = ?err, "Unhandled I/O error");
                response::internal_error()
            }
            FailureKind::Unclassified => self.unclassified(err, req),
        }
    }

    fn unclassified(&self, err: DownstreamError, req: &RequestInfo) -> Response<Full<Bytes>> {
        warn!(request = %req, reason = %err, "Unexpected downstream failure");
        error!(error = ?err, "Unexpected error in downstream pipeline");

        if req.accept.contains("application/json") {
            if let Ok(response) = response::json_internal_error() {
                return response;
            }
        } else if req.path != self.error_page {
            if let Some(response) = response::redirect(&self.error_page) {
                return response;
            }
        }
        response::internal_error()
    }
}
