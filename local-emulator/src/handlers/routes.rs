use super::{cors, json_response, response};
use crate::config::Config;
use crate::context::build_context;
use crate::error::EmulatorError;
use crate::event::{build_event, encode_body, InboundRequest};
use crate::invoker::invoke;
use crate::loader::{HandlerLoader, HandlerLocation};
use http_body_util::{combinators::BoxBody, BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Shown to callers instead of load errors outside of development.
const GENERIC_ERROR_MESSAGE: &str = "An error occurred";

/// Request bodies above the Lambda synchronous payload limit are rejected.
const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

pub(crate) struct Route {
    pub method: Method,
    pub path: &'static str,
    pub location: HandlerLocation,
}

/// The fixed route table.
pub(crate) const ROUTES: &[Route] = &[Route {
    method: Method::GET,
    path: "/api/home",
    location: HandlerLocation {
        tag: "home.get",
        library: "home_lambda",
        entry: "handler",
    },
}];

/// Everything a request needs, shared by all connections.
pub(crate) struct Emulator {
    pub config: Config,
    pub loader: HandlerLoader,
}

/// Matches like a non-strict router: a trailing `/` is ignored and HEAD is served by GET routes.
pub(crate) fn find_route(method: &Method, path: &str) -> Result<&'static Route, EmulatorError> {
    let wanted = if *method == Method::HEAD { Method::GET } else { method.clone() };
    let trimmed = match path.strip_suffix('/') {
        Some(v) if !v.is_empty() => v,
        _ => path,
    };

    ROUTES
        .iter()
        .find(|r| r.method == wanted && r.path == trimmed)
        .ok_or_else(|| EmulatorError::RouteNotFound {
            method: method.to_string(),
            path: path.to_owned(),
        })
}

/// Serves a single HTTP request. Always produces exactly one response.
pub(crate) async fn route<B>(
    emulator: Arc<Emulator>,
    req: Request<B>,
    client_address: Option<SocketAddr>,
) -> Response<BoxBody<Bytes, hyper::Error>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let mut response = if method == Method::OPTIONS {
        cors::preflight()
    } else {
        match find_route(&method, &path) {
            Ok(route) => invoke_route(&emulator, route, req, client_address).await,
            Err(e) => {
                debug!("{e}");
                json_response(
                    StatusCode::NOT_FOUND,
                    json!({ "error": "Not Found", "path": path, "method": method.as_str() }),
                )
            }
        }
    };

    cors::apply(response.headers_mut(), &emulator.config.frontend_url);

    info!(
        "[{method}] {path} - {} ({}ms)",
        response.status().as_u16(),
        started.elapsed().as_millis()
    );

    response
}

/// Received -> EventBuilt -> HandlerLoaded -> Invoked -> ResponseWritten
async fn invoke_route<B>(
    emulator: &Emulator,
    route: &Route,
    req: Request<B>,
    client_address: Option<SocketAddr>,
) -> Response<BoxBody<Bytes, hyper::Error>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(v) => v.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!("Request body of {} {} is over {MAX_BODY_BYTES} bytes", parts.method, parts.uri.path());
            return json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                json!({ "error": "Payload Too Large", "message": e.to_string() }),
            );
        }
        Err(e) => {
            warn!("Failed to read the request body: {e}");
            Bytes::new()
        }
    };

    let request = InboundRequest::from_parts(&parts, client_address);
    let event = build_event(&request, encode_body(&request.headers, &body));
    let context = build_context();

    let handler = match emulator.loader.load_handler(&route.location) {
        Ok(v) => v,
        Err(e) => {
            error!("{e}");
            return load_failure(&e, &emulator.config);
        }
    };

    let result = invoke(&handler, event, context).await;

    response::write(result)
}

fn load_failure(e: &EmulatorError, config: &Config) -> Response<BoxBody<Bytes, hyper::Error>> {
    let message = if config.is_development() {
        e.to_string()
    } else {
        GENERIC_ERROR_MESSAGE.to_owned()
    };

    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "Internal Server Error", "message": message }),
    )
}
