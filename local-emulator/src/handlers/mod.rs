use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{header, Response, StatusCode};
use serde_json::Value;

pub(crate) mod cors;
pub(crate) mod response;
pub(crate) mod routes;

/// Returns an empty response body.
pub(crate) fn empty() -> BoxBody<Bytes, hyper::Error> {
    http_body_util::Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Returns an response body with contents of `chunk` which can be some type convertible into Bytes, e.g. &str.
pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed()
}

/// A JSON response generated by the emulator itself, not by a handler.
pub(crate) fn json_response(status: StatusCode, body: Value) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full(body.to_string()))
        .expect("Failed to create a response")
}
