//! C ABI bridge for handlers compiled as dynamic libraries.
//!
//! A handler library exports two symbols, generated by [export_handler](crate::export_handler):
//! - `handler(event_json, context_json) -> outcome_json`
//! - `handler_free(outcome_json)`
//!
//! All strings are NUL-terminated UTF-8 JSON. The outcome is either `{"ok": <InvocationResult>}`
//! or `{"err": "<message>"}`. The string is allocated by the library and must be released by it.
use crate::{Error, InvocationContext, InvocationEvent, InvocationResult};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::ffi::{c_char, CStr, CString};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Once;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Suffix appended to the entry point name to get the name of the deallocation function.
pub const FREE_SUFFIX: &str = "_free";

/// Signature of the exported entry point.
pub type EntryPoint = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut c_char;

/// Signature of the exported function releasing the entry point output.
pub type FreeOutcome = unsafe extern "C" fn(*mut c_char);

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok(InvocationResult),
    Err(String),
}

impl Outcome {
    pub fn into_result(self) -> Result<InvocationResult, Error> {
        match self {
            Outcome::Ok(v) => Ok(v),
            Outcome::Err(e) => Err(Error::from(e)),
        }
    }
}

/// Exports `$handler` as the `handler` / `handler_free` pair the emulator looks for.
///
/// ```ignore
/// emulator_types::export_handler!(get_home);
/// ```
#[macro_export]
macro_rules! export_handler {
    ($handler:path) => {
        /// Called by the local emulator with JSON-encoded event and context.
        ///
        /// # Safety
        /// Both pointers must be valid NUL-terminated strings.
        #[no_mangle]
        pub unsafe extern "C" fn handler(
            event: *const ::std::ffi::c_char,
            context: *const ::std::ffi::c_char,
        ) -> *mut ::std::ffi::c_char {
            $crate::ffi::call_handler(event, context, $handler)
        }

        /// Releases the string returned by `handler`.
        ///
        /// # Safety
        /// `outcome` must come from `handler` and must not be used afterwards.
        #[no_mangle]
        pub unsafe extern "C" fn handler_free(outcome: *mut ::std::ffi::c_char) {
            $crate::ffi::free_outcome(outcome)
        }
    };
}

/// Library side: decodes the arguments, runs `handler` to completion and returns an encoded [Outcome].
/// Errors and panics are returned as `Outcome::Err` so nothing unwinds across the C boundary.
///
/// # Safety
/// `event` and `context` must be valid NUL-terminated strings.
pub unsafe fn call_handler<F, Fut>(event: *const c_char, context: *const c_char, handler: F) -> *mut c_char
where
    F: FnOnce(InvocationEvent, InvocationContext) -> Fut,
    Fut: Future<Output = Result<InvocationResult, Error>>,
{
    init_library_tracing();

    if event.is_null() || context.is_null() {
        return encode_outcome(&Outcome::Err("Null event or context".to_owned()));
    }

    let event = CStr::from_ptr(event);
    let context = CStr::from_ptr(context);

    let outcome = match catch_unwind(AssertUnwindSafe(|| run_handler(event, context, handler))) {
        Ok(v) => v,
        Err(panic) => Outcome::Err(panic_message(panic.as_ref())),
    };

    encode_outcome(&outcome)
}

/// Library side: releases a string returned by [call_handler].
///
/// # Safety
/// `outcome` must be a pointer returned by [call_handler] that was not freed yet.
pub unsafe fn free_outcome(outcome: *mut c_char) {
    if !outcome.is_null() {
        drop(CString::from_raw(outcome));
    }
}

/// Host side: calls the entry point of a loaded library and decodes its outcome.
///
/// # Safety
/// `entry` and `free` must be symbols of the same loaded library and the library must stay loaded
/// for the duration of the call.
pub unsafe fn invoke_raw(
    entry: EntryPoint,
    free: FreeOutcome,
    event: &InvocationEvent,
    context: &InvocationContext,
) -> Result<InvocationResult, Error> {
    let event = CString::new(serde_json::to_string(event)?)?;
    let context = CString::new(serde_json::to_string(context)?)?;

    let raw = entry(event.as_ptr(), context.as_ptr());
    if raw.is_null() {
        return Err(Error::from("Handler returned no result"));
    }

    let outcome = serde_json::from_slice::<Outcome>(CStr::from_ptr(raw).to_bytes());
    free(raw);

    outcome?.into_result()
}

fn run_handler<F, Fut>(event: &CStr, context: &CStr, handler: F) -> Outcome
where
    F: FnOnce(InvocationEvent, InvocationContext) -> Fut,
    Fut: Future<Output = Result<InvocationResult, Error>>,
{
    let event: InvocationEvent = match serde_json::from_slice(event.to_bytes()) {
        Ok(v) => v,
        Err(e) => return Outcome::Err(format!("Invalid event: {e}")),
    };

    let context: InvocationContext = match serde_json::from_slice(context.to_bytes()) {
        Ok(v) => v,
        Err(e) => return Outcome::Err(format!("Invalid context: {e}")),
    };

    // the library has its own copy of tokio, so it needs its own runtime
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(v) => v,
        Err(e) => return Outcome::Err(format!("Failed to start the handler runtime: {e}")),
    };

    match runtime.block_on(handler(event, context)) {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e.to_string()),
    }
}

fn encode_outcome(outcome: &Outcome) -> *mut c_char {
    let json = serde_json::to_string(outcome).unwrap_or_else(|e| {
        serde_json::json!({ "err": format!("Failed to serialize the handler result: {e}") }).to_string()
    });

    // serde_json escapes NUL so this never fails in practice
    match CString::new(json) {
        Ok(v) => v.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Extracts the text of a panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(v) = panic.downcast_ref::<&str>() {
        v.to_string()
    } else if let Some(v) = panic.downcast_ref::<String>() {
        v.clone()
    } else {
        "Handler panicked".to_owned()
    }
}

/// A dynamic library gets its own copy of `tracing` with no subscriber,
/// so handler logs would be lost without this.
fn init_library_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let level = library_log_level(std::env::var("LOG_LEVEL").ok().as_deref());
        let filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(true)
            .with_target(false)
            .compact()
            .try_init();
    });
}

/// The level for handler logs when RUST_LOG is not set, taken from LOG_LEVEL.
fn library_log_level(log_level: Option<&str>) -> LevelFilter {
    log_level
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO)
}
