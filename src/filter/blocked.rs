//! Cheapest rejection path: IPs already on the blocklist

use std::sync::Arc;

use super::{Filter, FilterAction, Rejection};
use crate::blocklist::Blocklist;
use crate::request::RequestInfo;

pub struct BlockedIpFilter {
    blocklist: Arc<Blocklist>,
}

impl BlockedIpFilter {
    pub fn new(blocklist: Arc<Blocklist>) -> Self {
        Self { blocklist }
    }
}

#[async_trait::async_trait]
impl Filter for BlockedIpFilter {
    async fn filter(&self, req: &RequestInfo) -> FilterAction {
        if self.blocklist.is_blocked(&req.ip) {
            FilterAction::Deny(Rejection::AlreadyBlocked)
        } else {
            FilterAction::Allow
        }
    }

    fn name(&self) -> &str {
        "blocked_ip"
    }
}
