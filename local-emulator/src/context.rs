use crate::event::local_request_id;
use chrono::Utc;
use emulator_types::{InvocationContext, REMAINING_TIME_MS};

const FUNCTION_NAME: &str = "local-function";
const FUNCTION_VERSION: &str = "$LATEST";
const FUNCTION_ARN: &str = "arn:aws:lambda:local:000000000000:function:local";
const MEMORY_LIMIT_MB: u32 = 256;
const LOG_GROUP: &str = "/aws/lambda/local";
const LOG_STREAM: &str = "local-stream";

/// Synthesizes the invocation metadata for a single call.
/// The remaining time is a fixed budget: handlers do not see it shrink while they run.
pub(crate) fn build_context() -> InvocationContext {
    InvocationContext {
        function_name: FUNCTION_NAME.to_owned(),
        function_version: FUNCTION_VERSION.to_owned(),
        invoked_function_arn: FUNCTION_ARN.to_owned(),
        memory_limit_in_mb: MEMORY_LIMIT_MB,
        aws_request_id: local_request_id(&Utc::now()),
        log_group_name: LOG_GROUP.to_owned(),
        log_stream_name: LOG_STREAM.to_owned(),
        remaining_time_in_millis: REMAINING_TIME_MS,
    }
}
