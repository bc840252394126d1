//! Per-request entry point
//!
//! Flow:
//! 1. Blocked IP check, allow-list, signature scan (filter chain)
//! 2. If allowed: hand the request to the downstream pipeline
//! 3. Any downstream failure is absorbed by the error normalizer

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use tracing::debug;

use crate::blocklist::Blocklist;
use crate::config::RoutesConfig;
use crate::downstream::Downstream;
use crate::filter::{
    AllowList, AllowListFilter, BlockedIpFilter, FilterAction, FilterChain, SignatureFilter,
    SignatureScanner,
};
use crate::normalizer::ErrorNormalizer;
use crate::proxy::ClientAddr;
use crate::recorder::ViolationRecorder;
use crate::request::RequestInfo;

pub struct Gatekeeper {
    chain: FilterChain,
    downstream: Arc<dyn Downstream>,
    normalizer: ErrorNormalizer,
    blocklist: Arc<Blocklist>,
    recorder: ViolationRecorder,
}

impl Gatekeeper {
    /// Builds the standard filter chain around `downstream`.
    pub fn new(
        routes: &RoutesConfig,
        blocklist: Arc<Blocklist>,
        recorder: ViolationRecorder,
        downstream: Arc<dyn Downstream>,
    ) -> Self {
        let chain = FilterChain::new()
            .add_filter(Arc::new(BlockedIpFilter::new(blocklist.clone())))
            .add_filter(Arc::new(AllowListFilter::new(AllowList::new(
                routes.allowed_paths.as_slice(),
            ))))
            .add_filter(Arc::new(SignatureFilter::new(
                SignatureScanner::new(routes.landing_page.clone()),
                recorder.clone(),
            )));

        Self::with_chain(chain, routes, blocklist, recorder, downstream)
    }

    pub fn with_chain(
        chain: FilterChain,
        routes: &RoutesConfig,
        blocklist: Arc<Blocklist>,
        recorder: ViolationRecorder,
        downstream: Arc<dyn Downstream>,
    ) -> Self {
        Self {
            chain,
            downstream,
            normalizer: ErrorNormalizer::new(recorder.clone(), routes.error_page.clone()),
            blocklist,
            recorder,
        }
    }

    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }

    pub fn recorder(&self) -> &ViolationRecorder {
        &self.recorder
    }

    pub async fn handle(&self, req: Request<Incoming>, remote_addr: SocketAddr) -> Response<Full<Bytes>> {
        let (mut parts, body) = req.into_parts();
        let info = RequestInfo::from_parts(&parts, remote_addr);

        match self.chain.execute(&info).await {
            FilterAction::Allow => {}
            denied => return self.chain.action_to_response(denied),
        }

        debug!(request = %info, "Request admitted");
        parts.extensions.insert(ClientAddr(remote_addr));
        let req = Request::from_parts(parts, body);

        match self.downstream.call(req).await {
            Ok(response) => response,
            Err(e) => self.normalizer.normalize(e, &info),
        }
    }
}
