//! The `GET /api/home` handler.
//!
//! Built as a `cdylib` it is loaded by the local emulator, built as an `rlib` it is linked
//! into the Lambda binary in `main.rs`. The handler code is the same in both cases.
use chrono::{SecondsFormat, Utc};
use emulator_types::{export_handler, Error, InvocationContext, InvocationEvent, InvocationResult};
use serde_json::json;
use std::env::var;
use tracing::info;

export_handler!(get_home);

pub async fn get_home(event: InvocationEvent, _ctx: InvocationContext) -> Result<InvocationResult, Error> {
    info!(
        request_id = event.request_context.request_id.as_str(),
        path = event.path.as_str(),
        method = event.request_context.http_method.as_str(),
        "GET /api/home request received"
    );

    let body = json!({
        "message": "hello world",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "environment": var("APP_ENV").unwrap_or_else(|_| "production".to_owned()),
    });

    Ok(InvocationResult::new(200, body.to_string())
        .with_header("Content-Type", "application/json")
        .with_header("Access-Control-Allow-Origin", "*")
        .with_header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .with_header("Access-Control-Allow-Headers", "Content-Type"))
}
