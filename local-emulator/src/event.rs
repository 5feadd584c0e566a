use chrono::{DateTime, SecondsFormat, Utc};
use emulator_types::{Identity, InvocationEvent, RequestContext};
use http::request::Parts;
use hyper::body::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::warn;

/// Used when the caller address is not known.
const LOOPBACK: &str = "127.0.0.1";
const ACCOUNT_ID: &str = "000000000000";
const API_ID: &str = "local";
const STAGE: &str = "local";

/// The parts of an HTTP request the event is built from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InboundRequest {
    pub method: String,
    pub path: String,
    /// E.g. HTTP/1.1
    pub protocol: String,
    /// Names are lower-case as delivered by hyper. Repeated headers are joined with `, `.
    pub headers: HashMap<String, String>,
    /// URL-decoded. Only the last value of a repeated key is kept.
    pub query: Option<HashMap<String, String>>,
    pub client_address: Option<SocketAddr>,
}

impl InboundRequest {
    pub fn from_parts(parts: &Parts, client_address: Option<SocketAddr>) -> Self {
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in parts.headers.iter() {
            let value = String::from_utf8_lossy(value.as_bytes()).to_string();
            headers
                .entry(name.as_str().to_owned())
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(&value);
                })
                .or_insert(value);
        }

        // multi-valued params are not preserved: the last one wins
        let query = parts
            .uri
            .query()
            .filter(|q| !q.is_empty())
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect::<HashMap<_, _>>());

        Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_owned(),
            protocol: format!("{:?}", parts.version),
            headers,
            query,
            client_address,
        }
    }
}

/// Converts the raw request body into the text the handler receives.
/// JSON bodies are re-serialized compactly, other bodies are passed as text.
/// Returns None for an empty body.
pub(crate) fn encode_body(headers: &HashMap<String, String>, body: &Bytes) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let is_json = headers
        .get("content-type")
        .map(|v| v.to_ascii_lowercase().contains("json"))
        .unwrap_or_default();

    if is_json {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
            return Some(value.to_string());
        }
    }

    match String::from_utf8(body.to_vec()) {
        Ok(v) => Some(v),
        Err(e) => {
            // binary payloads are out of scope, the handler gets a lossy conversion
            warn!("Non-UTF-8 request body. {:?}\n{}", e, hex::encode(body));
            Some(String::from_utf8_lossy(body).to_string())
        }
    }
}

/// Generates a request ID from the current time, e.g. `local-1718071341165`.
/// Two calls within the same millisecond get the same ID.
pub(crate) fn local_request_id(now: &DateTime<Utc>) -> String {
    ["local-", &now.timestamp_millis().to_string()].concat()
}

/// Builds the gateway proxy event for `request`.
/// Only the request ID and the timestamps differ between two calls with the same input.
pub(crate) fn build_event(request: &InboundRequest, body: Option<String>) -> InvocationEvent {
    let now = Utc::now();

    let source_ip = request
        .client_address
        .map(|v| v.ip().to_string())
        .unwrap_or_else(|| LOOPBACK.to_owned());

    InvocationEvent {
        resource: request.path.clone(),
        path: request.path.clone(),
        http_method: request.method.clone(),
        headers: request.headers.clone(),
        multi_value_headers: HashMap::new(),
        query_string_parameters: request.query.clone(),
        multi_value_query_string_parameters: None,
        path_parameters: None,
        stage_variables: None,
        request_context: RequestContext {
            account_id: ACCOUNT_ID.to_owned(),
            api_id: API_ID.to_owned(),
            protocol: request.protocol.clone(),
            http_method: request.method.clone(),
            path: request.path.clone(),
            stage: STAGE.to_owned(),
            request_id: local_request_id(&now),
            request_time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            request_time_epoch: now.timestamp_millis(),
            identity: Identity { source_ip },
        },
        body,
        is_base64_encoded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request;

    fn inbound(uri: &str, headers: &[(&str, &str)]) -> InboundRequest {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        InboundRequest::from_parts(&parts, Some("192.168.1.7:50123".parse().unwrap()))
    }

    #[test]
    fn path_and_resource_are_the_request_path() {
        let event = build_event(&inbound("/api/home", &[]), None);

        assert_eq!(event.path, "/api/home");
        assert_eq!(event.resource, "/api/home");
        assert_eq!(event.http_method, "GET");
        assert_eq!(event.request_context.path, "/api/home");
        assert_eq!(event.request_context.protocol, "HTTP/1.1");
        assert_eq!(event.request_context.stage, "local");
        assert_eq!(event.request_context.identity.source_ip, "192.168.1.7");
        assert!(event.body.is_none());
        assert!(!event.is_base64_encoded);
        assert!(event.query_string_parameters.is_none());
        assert!(event.multi_value_query_string_parameters.is_none());
    }

    #[test]
    fn identical_requests_differ_only_in_request_id_and_time() {
        let request = inbound("/api/home?a=1", &[("accept", "application/json")]);

        let mut first = build_event(&request, Some("x".to_owned()));
        let mut second = build_event(&request, Some("x".to_owned()));

        for event in [&first, &second] {
            assert!(event.request_context.request_id.starts_with("local-"));
            assert!(event.request_context.request_id.len() > "local-".len());
            assert!(DateTime::parse_from_rfc3339(&event.request_context.request_time).is_ok());
            assert!(event.request_context.request_time_epoch > 0);
        }

        for event in [&mut first, &mut second] {
            event.request_context.request_id.clear();
            event.request_context.request_time.clear();
            event.request_context.request_time_epoch = 0;
        }
        assert_eq!(first, second);
    }

    #[test]
    fn query_keeps_one_decoded_value_per_key() {
        let event = build_event(&inbound("/api/home?name=J%C3%BCrgen+K&tag=a&tag=b", &[]), None);
        let query = event.query_string_parameters.unwrap();

        assert_eq!(query["name"], "Jürgen K");
        assert_eq!(query["tag"], "b");
        assert_eq!(query.len(), 2);
    }

    #[test]
    fn headers_pass_through_and_repeats_are_joined() {
        let request = inbound("/", &[("X-Custom", "1"), ("accept", "text/html"), ("accept", "*/*")]);

        assert_eq!(request.headers["x-custom"], "1");
        assert_eq!(request.headers["accept"], "text/html, */*");
    }

    #[test]
    fn missing_client_address_defaults_to_loopback() {
        let (parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        let event = build_event(&InboundRequest::from_parts(&parts, None), None);

        assert_eq!(event.request_context.identity.source_ip, "127.0.0.1");
    }

    #[test]
    fn json_body_is_serialized_to_compact_text() {
        let headers = HashMap::from([("content-type".to_owned(), "application/json".to_owned())]);

        let body = encode_body(&headers, &Bytes::from_static(b"{ \"a\" : 1 }"));
        assert_eq!(body.as_deref(), Some(r#"{"a":1}"#));

        assert_eq!(encode_body(&headers, &Bytes::new()), None);
        assert_eq!(
            encode_body(&HashMap::new(), &Bytes::from_static(b"plain")).as_deref(),
            Some("plain")
        );
    }
}
