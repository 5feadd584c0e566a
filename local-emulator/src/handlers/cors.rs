use super::empty;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Response, StatusCode};
use tracing::warn;

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Adds the CORS headers for `origin` unless the handler already set them.
pub(crate) fn apply(headers: &mut HeaderMap, origin: &str) {
    match HeaderValue::from_str(origin) {
        Ok(v) => {
            headers.entry(header::ACCESS_CONTROL_ALLOW_ORIGIN).or_insert(v);
        }
        Err(e) => warn!("Invalid CORS origin {origin}: {e}"),
    }

    headers
        .entry(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
        .or_insert(HeaderValue::from_static("true"));
}

/// The answer to an OPTIONS request. The origin headers are added by [apply].
pub(crate) fn preflight() -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS)
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS)
        .body(empty())
        .expect("Failed to create a response")
}
