//! Fixed response bodies and infallible response builders

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::{Response, StatusCode};
use serde::Serialize;

pub const BODY_REJECTED: &str = "are you kidding";
pub const BODY_BLOCKED: &str = "blocked, go away";
pub const BODY_NOT_FOUND: &str = "not found";
pub const BODY_INTERNAL_ERROR: &str = "Internal Server Error";

const TEXT_PLAIN: &str = "text/plain";
const APPLICATION_JSON: &str = "application/json";

/// Plain-text response with an explicit content length.
pub fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    with_body(status, TEXT_PLAIN, body.into())
}

/// The minimal "reset" answer used for probes and aborted exchanges.
pub fn rejected() -> Response<Full<Bytes>> {
    plain(StatusCode::BAD_REQUEST, BODY_REJECTED)
}

pub fn internal_error() -> Response<Full<Bytes>> {
    plain(StatusCode::INTERNAL_SERVER_ERROR, BODY_INTERNAL_ERROR)
}

#[derive(Serialize)]
struct ErrorBody {
    message: &'static str,
    status: u16,
}

/// `{"message":"Internal Server Error","status":500}`
pub fn json_internal_error() -> Result<Response<Full<Bytes>>, serde_json::Error> {
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let body = serde_json::to_vec(&ErrorBody {
        message: BODY_INTERNAL_ERROR,
        status: status.as_u16(),
    })?;
    Ok(with_body(status, APPLICATION_JSON, Bytes::from(body)))
}

/// `302 Found` pointing at `location`. Fails only on a location that is not
/// a valid header value.
pub fn redirect(location: &str) -> Option<Response<Full<Bytes>>> {
    let location = HeaderValue::from_str(location).ok()?;
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(LOCATION, location);
    Some(response)
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let length = HeaderValue::from(body.len());
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, length);
    response
}
