//! The rest of the request pipeline, as seen from the gatekeeper
//!
//! Anything that turns an admitted request into a response implements
//! [`Downstream`]: the upstream proxy, the firewall wrapping it, or a test
//! double. Failures are reported as [`DownstreamError`] and are fully
//! absorbed by the error normalizer.

pub mod firewall;

pub use firewall::Firewall;

use std::io;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use thiserror::Error;

/// Failures surfacing from downstream handling
#[derive(Error, Debug)]
pub enum DownstreamError {
    /// The client went away while the response was produced
    #[error("client aborted: {0}")]
    ClientAbort(String),

    /// The request was refused before reaching application logic
    #[error("{0}")]
    Rejected(String),

    /// The handler for the request could not be constructed
    #[error("handler construction failed: {0}")]
    HandlerConstruction(String),

    /// A failure raised inside a nested handler invocation
    #[error("nested handler failure: {source}")]
    Nested {
        #[source]
        source: Box<DownstreamError>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Internal(String),
}

impl DownstreamError {
    pub fn nested(source: DownstreamError) -> Self {
        DownstreamError::Nested {
            source: Box::new(source),
        }
    }
}

#[async_trait::async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, DownstreamError>;
}
