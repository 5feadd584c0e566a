use crate::error::EmulatorError;
use emulator_types::ffi::panic_message;
use emulator_types::{HandlerFn, InvocationContext, InvocationEvent, InvocationResult};
use serde_json::json;
use tracing::{error, info};

/// Runs the handler once and always returns a well-formed result.
/// Errors and panics inside the handler are logged and turned into a 500 result.
pub(crate) async fn invoke(
    handler: &HandlerFn,
    event: InvocationEvent,
    context: InvocationContext,
) -> InvocationResult {
    info!("Invoking handler with path: {}", event.path);

    // running it as a separate task contains a panic to that task
    let outcome = match tokio::spawn(handler(event, context)).await {
        Ok(v) => v.map_err(|e| EmulatorError::HandlerExecution(e.to_string())),
        Err(e) if e.is_panic() => Err(EmulatorError::HandlerExecution(panic_message(
            e.into_panic().as_ref(),
        ))),
        Err(e) => Err(EmulatorError::HandlerExecution(e.to_string())),
    };

    match outcome {
        Ok(result) => {
            info!("Handler returned status: {}", result.status());
            result
        }
        Err(e) => {
            error!("Handler failed: {e}");
            error_result(&e.to_string())
        }
    }
}

/// The result sent back when the handler fails.
pub(crate) fn error_result(message: &str) -> InvocationResult {
    let message = if message.trim().is_empty() {
        "Unknown error"
    } else {
        message
    };

    InvocationResult::new(
        500,
        json!({
            "error": "Internal Server Error",
            "message": message,
        })
        .to_string(),
    )
    .with_header("Content-Type", "application/json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::build_context;
    use emulator_types::{handler_fn, Error};
    use serde_json::Value;

    fn body_json(result: &InvocationResult) -> Value {
        serde_json::from_str(&result.body).unwrap()
    }

    #[tokio::test]
    async fn success_passes_through_unchanged() {
        let expected = InvocationResult {
            status_code: None,
            headers: None,
            body: "raw text, not json".to_owned(),
        };
        let returned = expected.clone();
        let handler = handler_fn(move |_event, _ctx| {
            let returned = returned.clone();
            async move { Ok(returned) }
        });

        let result = invoke(&handler, InvocationEvent::default(), build_context()).await;
        assert_eq!(result, expected);
    }

    #[tokio::test]
    async fn handler_error_becomes_500_with_message() {
        let handler = handler_fn(|_event, _ctx| async { Err(Error::from("database is on fire")) });

        let result = invoke(&handler, InvocationEvent::default(), build_context()).await;

        assert_eq!(result.status(), 500);
        assert_eq!(result.headers.as_ref().unwrap().len(), 1);
        let body = body_json(&result);
        assert_eq!(body["error"], "Internal Server Error");
        assert_eq!(body["message"], "database is on fire");
    }

    #[tokio::test]
    async fn handler_panic_becomes_500() {
        let handler = handler_fn(|event: InvocationEvent, _ctx| async move {
            if event.path.is_empty() {
                panic!("no path");
            }
            Ok(InvocationResult::new(200, ""))
        });

        let result = invoke(&handler, InvocationEvent::default(), build_context()).await;

        assert_eq!(result.status(), 500);
        assert_eq!(body_json(&result)["message"], "no path");
    }

    #[test]
    fn empty_message_is_replaced() {
        let result = error_result("");
        assert_eq!(body_json(&result)["message"], "Unknown error");
    }
}
