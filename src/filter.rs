//! Filter chain for request inspection
//!
//! Provides async trait-based filtering with a composable filter chain.
//! Filters either allow a request or deny it with one of the fixed
//! rejections. The gatekeeper runs them in order: blocked IP, allow-list,
//! attack signatures.

pub mod allow_list;
pub mod blocked;
pub mod signature;

pub use allow_list::{AllowList, AllowListFilter};
pub use blocked::BlockedIpFilter;
pub use signature::{SignatureFilter, SignatureScanner};

use std::fmt;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

use crate::request::RequestInfo;
use crate::response::{self, BODY_BLOCKED, BODY_NOT_FOUND, BODY_REJECTED};

/// Why a filter refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Client IP is on the blocklist
    AlreadyBlocked,
    /// Path is not a known route
    AllowListViolation,
    /// Path or headers carry an attack signature
    SignatureViolation,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::AlreadyBlocked | Rejection::SignatureViolation => StatusCode::BAD_REQUEST,
            Rejection::AllowListViolation => StatusCode::NOT_FOUND,
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            Rejection::AlreadyBlocked => BODY_BLOCKED,
            Rejection::AllowListViolation => BODY_NOT_FOUND,
            Rejection::SignatureViolation => BODY_REJECTED,
        }
    }
}

/// Action to take after filter inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    /// Allow request to proceed
    Allow,
    /// Answer with the rejection's fixed response
    Deny(Rejection),
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterAction::Allow => write!(f, "Allow"),
            FilterAction::Deny(rejection) => {
                write!(f, "Deny(status={}, reason={:?})", rejection.status().as_u16(), rejection)
            }
        }
    }
}

/// Trait for request filters
#[async_trait::async_trait]
pub trait Filter: Send + Sync {
    /// Inspect request and return action
    async fn filter(&self, req: &RequestInfo) -> FilterAction;

    /// Filter name for logging
    fn name(&self) -> &str;
}

/// Chain of filters executed sequentially
///
/// First non-Allow action short-circuits the chain.
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    pub fn add_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub async fn execute(&self, req: &RequestInfo) -> FilterAction {
        for filter in &self.filters {
            let action = filter.filter(req).await;
            if action != FilterAction::Allow {
                tracing::debug!(
                    filter = filter.name(),
                    action = %action,
                    request = %req,
                    "Filter blocked request"
                );
                return action;
            }
        }
        FilterAction::Allow
    }

    pub fn action_to_response(&self, action: FilterAction) -> Response<Full<Bytes>> {
        match action {
            FilterAction::Allow => response::plain(StatusCode::OK, "OK"),
            FilterAction::Deny(rejection) => response::plain(rejection.status(), rejection.body()),
        }
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::SocketAddr;

    use hyper::header::{REFERER, USER_AGENT};
    use hyper::Request;

    pub(crate) fn request_info(uri: &str, user_agent: &str, referer: &str) -> RequestInfo {
        let parts = Request::builder()
            .uri(uri)
            .header(USER_AGENT, user_agent)
            .header(REFERER, referer)
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let addr: SocketAddr = "192.0.2.10:50000".parse().unwrap();
        RequestInfo::from_parts(&parts, addr)
    }

    struct FixedFilter(FilterAction);

    #[async_trait::async_trait]
    impl Filter for FixedFilter {
        async fn filter(&self, _req: &RequestInfo) -> FilterAction {
            self.0.clone()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_filter_action_display() {
        assert_eq!(FilterAction::Allow.to_string(), "Allow");
        assert_eq!(
            FilterAction::Deny(Rejection::AllowListViolation).to_string(),
            "Deny(status=404, reason=AllowListViolation)"
        );
    }

    #[test]
    fn test_rejection_responses() {
        assert_eq!(Rejection::AlreadyBlocked.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Rejection::AlreadyBlocked.body(), "blocked, go away");
        assert_eq!(Rejection::SignatureViolation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Rejection::SignatureViolation.body(), "are you kidding");
        assert_eq!(Rejection::AllowListViolation.status(), StatusCode::NOT_FOUND);
        assert_eq!(Rejection::AllowListViolation.body(), "not found");
    }

    #[test]
    fn test_action_to_response_deny() {
        let chain = FilterChain::new();
        let response = chain.action_to_response(FilterAction::Deny(Rejection::AlreadyBlocked));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chain_short_circuits() {
        let chain = FilterChain::new()
            .add_filter(Arc::new(FixedFilter(FilterAction::Allow)))
            .add_filter(Arc::new(FixedFilter(FilterAction::Deny(
                Rejection::AllowListViolation,
            ))))
            .add_filter(Arc::new(FixedFilter(FilterAction::Deny(
                Rejection::AlreadyBlocked,
            ))));

        assert_eq!(chain.len(), 3);
        let action = chain.execute(&request_info("/", "", "")).await;
        assert_eq!(action, FilterAction::Deny(Rejection::AllowListViolation));
    }

    #[tokio::test]
    async fn test_empty_chain_allows() {
        let chain = FilterChain::default();
        assert!(chain.is_empty());
        assert_eq!(
            chain.execute(&request_info("/", "", "")).await,
            FilterAction::Allow
        );
    }
}
