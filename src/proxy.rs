//! Reverse proxy to the protected application
//!
//! Handles request forwarding with:
//! - Connection pooling to the upstream
//! - Header rewriting (X-Forwarded-For, X-Real-IP, Host)
//! - Failure mapping into [`DownstreamError`]

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::{HeaderMap, Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::downstream::{Downstream, DownstreamError};
use crate::error::{GatekeeperError, Result};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream application URL (e.g., "http://localhost:3000")
    pub upstream_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Preserve Host header from original request
    pub preserve_host: bool,
}

impl ProxyConfig {
    pub fn new(upstream_url: String) -> Self {
        Self {
            upstream_url,
            timeout: Duration::from_secs(30),
            preserve_host: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_preserve_host(mut self, preserve: bool) -> Self {
        self.preserve_host = preserve;
        self
    }
}

/// Reverse proxy client with connection pooling
pub struct ProxyClient {
    config: ProxyConfig,
    client: Client<HttpConnector, Incoming>,
    upstream_uri: Uri,
}

impl ProxyClient {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let upstream_uri: Uri = config
            .upstream_url
            .parse()
            .map_err(|e| GatekeeperError::Upstream(format!("Invalid upstream URL: {}", e)))?;

        if upstream_uri.authority().is_none() {
            return Err(GatekeeperError::Upstream(format!(
                "Upstream URL has no host: {}",
                config.upstream_url
            )));
        }

        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            config,
            client,
            upstream_uri,
        })
    }

    fn upstream_target(&self, req: &Request<Incoming>) -> std::result::Result<Uri, DownstreamError> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let authority = self
            .upstream_uri
            .authority()
            .map(|a| a.as_str())
            .unwrap_or("localhost");

        format!(
            "{}://{}{}",
            self.upstream_uri.scheme_str().unwrap_or("http"),
            authority,
            path_and_query
        )
        .parse()
        .map_err(|e| DownstreamError::Internal(format!("Failed to build upstream URI: {}", e)))
    }

    /// Rewrite request headers for proxy
    fn rewrite_headers(&self, headers: &mut HeaderMap, client_addr: SocketAddr) {
        let client_ip = client_addr.ip().to_canonical().to_string();

        let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, client_ip),
            None => client_ip.clone(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
        if let Ok(value) = HeaderValue::from_str(&client_ip) {
            headers.insert(X_REAL_IP, value);
        }

        if !self.config.preserve_host {
            if let Some(value) = self
                .upstream_uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            {
                headers.insert(HOST, value);
            }
        }

        for name in HOP_BY_HOP {
            headers.remove(*name);
        }
    }

    pub async fn forward(
        &self,
        mut req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> std::result::Result<Response<Full<Bytes>>, DownstreamError> {
        *req.uri_mut() = self.upstream_target(&req)?;
        self.rewrite_headers(req.headers_mut(), client_addr);

        let response = tokio::time::timeout(self.config.timeout, self.client.request(req))
            .await
            .map_err(|_| DownstreamError::Internal("Upstream request timeout".to_string()))?
            .map_err(|e| upstream_failure("Upstream request failed", &e))?;

        let (parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| upstream_failure("Failed to read upstream response", &e))?
            .to_bytes();

        Ok(Response::from_parts(parts, Full::new(body_bytes)))
    }
}

/// Surfaces an I/O cause from the error chain, so resets stay recognizable.
fn upstream_failure(context: &str, err: &(dyn StdError + 'static)) -> DownstreamError {
    let mut cause: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cause {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return DownstreamError::Io(io::Error::new(io_err.kind(), io_err.to_string()));
        }
        cause = e.source();
    }
    DownstreamError::Internal(format!("{}: {}", context, err))
}

/// Requests reaching the proxy come from the server, which tags them with
/// the peer address.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

#[async_trait::async_trait]
impl Downstream for ProxyClient {
    async fn call(
        &self,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, DownstreamError> {
        let client_addr = req
            .extensions()
            .get::<ClientAddr>()
            .map(|addr| addr.0)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        self.forward(req, client_addr).await
    }
}
