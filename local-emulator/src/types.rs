//! Types shared between the local emulator and the handlers it invokes.
//!
//! The event and result shapes are the API Gateway REST proxy integration shapes,
//! so a handler written against them runs unmodified on AWS Lambda and inside the emulator.
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub mod ffi;

/// The error type handlers return. It is the same boxed error `lambda_runtime` expects.
pub use lambda_runtime::Error;

/// The remaining time reported by the emulator. It does not decrease while the handler runs.
pub const REMAINING_TIME_MS: u64 = 30_000;

/// An inbound HTTP request as delivered by the gateway proxy integration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvent {
    pub resource: String,
    pub path: String,
    pub http_method: String,
    #[serde(default, deserialize_with = "nullable_map")]
    pub headers: HashMap<String, String>,
    #[serde(default, deserialize_with = "nullable_map")]
    pub multi_value_headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub multi_value_query_string_parameters: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub path_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub stage_variables: Option<HashMap<String, String>>,
    #[serde(default)]
    pub request_context: RequestContext,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    pub account_id: String,
    pub api_id: String,
    pub protocol: String,
    pub http_method: String,
    pub path: String,
    pub stage: String,
    pub request_id: String,
    /// RFC 3339, e.g. 2024-06-11T09:15:41.165Z
    pub request_time: String,
    /// Milliseconds since the epoch
    pub request_time_epoch: i64,
    pub identity: Identity,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Identity {
    pub source_ip: String,
}

/// Invocation metadata passed to the handler next to the event.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub function_name: String,
    pub function_version: String,
    pub invoked_function_arn: String,
    pub memory_limit_in_mb: u32,
    pub aws_request_id: String,
    pub log_group_name: String,
    pub log_stream_name: String,
    /// A snapshot taken when the context was built
    pub remaining_time_in_millis: u64,
}

impl InvocationContext {
    /// Returns the time budget left for the invocation.
    /// Under the emulator this is always [REMAINING_TIME_MS].
    pub fn get_remaining_time_in_millis(&self) -> u64 {
        self.remaining_time_in_millis
    }

    /// Lifecycle callbacks kept for handler compatibility. They do nothing.
    pub fn done(&self) {}
    pub fn fail(&self) {}
    pub fn succeed(&self) {}
}

impl From<lambda_runtime::Context> for InvocationContext {
    /// Maps the context of a real Lambda invocation onto the handler contract.
    fn from(ctx: lambda_runtime::Context) -> Self {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();

        Self {
            function_name: ctx.env_config.function_name.clone(),
            function_version: ctx.env_config.version.clone(),
            invoked_function_arn: ctx.invoked_function_arn,
            memory_limit_in_mb: u32::try_from(ctx.env_config.memory).unwrap_or_default(),
            aws_request_id: ctx.request_id,
            log_group_name: ctx.env_config.log_group.clone(),
            log_stream_name: ctx.env_config.log_stream.clone(),
            remaining_time_in_millis: ctx.deadline.saturating_sub(now),
        }
    }
}

/// What a handler returns. The body is already serialized by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: String,
}

impl InvocationResult {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            headers: None,
            body: body.into(),
        }
    }

    /// Adds or replaces a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// The status to send, 200 if the handler did not set one.
    pub fn status(&self) -> u16 {
        self.status_code.unwrap_or(200)
    }
}

/// The future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<InvocationResult, Error>> + Send>>;

/// Any function with the `(event, context) -> result` shape.
pub type HandlerFn = Arc<dyn Fn(InvocationEvent, InvocationContext) -> HandlerFuture + Send + Sync>;

/// Wraps an async function or closure into a [HandlerFn].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(InvocationEvent, InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<InvocationResult, Error>> + Send + 'static,
{
    Arc::new(move |event, ctx| Box::pin(f(event, ctx)))
}

/// The gateway sends `null` instead of `{}` for some maps.
fn nullable_map<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_defaults_to_200_when_status_is_missing() {
        let result: InvocationResult = serde_json::from_value(json!({ "body": "ok" })).unwrap();
        assert_eq!(result.status(), 200);
        assert!(result.headers.is_none());
    }

    #[test]
    fn result_serializes_in_gateway_shape() {
        let result = InvocationResult::new(201, "{}").with_header("X-Test", "1");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["statusCode"], 201);
        assert_eq!(value["headers"]["X-Test"], "1");
        assert_eq!(value["body"], "{}");
    }

    #[test]
    fn event_accepts_null_maps_from_the_gateway() {
        let event: InvocationEvent = serde_json::from_value(json!({
            "resource": "/api/home",
            "path": "/api/home",
            "httpMethod": "GET",
            "headers": null,
            "multiValueHeaders": null,
            "queryStringParameters": null,
            "requestContext": { "requestId": "abc", "identity": { "sourceIp": "10.0.0.1" } },
            "body": null,
            "isBase64Encoded": false
        }))
        .unwrap();

        assert!(event.headers.is_empty());
        assert_eq!(event.request_context.request_id, "abc");
        assert_eq!(event.request_context.identity.source_ip, "10.0.0.1");
    }

    #[test]
    fn lifecycle_callbacks_leave_the_budget_alone() {
        let ctx = InvocationContext {
            function_name: "f".to_owned(),
            function_version: "$LATEST".to_owned(),
            invoked_function_arn: "arn".to_owned(),
            memory_limit_in_mb: 128,
            aws_request_id: "id".to_owned(),
            log_group_name: "g".to_owned(),
            log_stream_name: "s".to_owned(),
            remaining_time_in_millis: REMAINING_TIME_MS,
        };
        ctx.succeed();
        ctx.fail();
        ctx.done();
        assert_eq!(ctx.get_remaining_time_in_millis(), REMAINING_TIME_MS);
    }
}
