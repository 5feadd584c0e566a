use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum EmulatorError {
    /// Invalid startup configuration. The process exits before serving traffic.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The handler library or its entry point is missing.
    #[error("Handler {tag} could not be resolved: {reason}")]
    HandlerNotFound { tag: String, reason: String },

    /// The handler library exists but could not be loaded.
    #[error("Handler {tag} failed to load: {reason}")]
    HandlerLoad { tag: String, reason: String },

    /// The handler returned an error or panicked. Never propagated past the invoker.
    #[error("{0}")]
    HandlerExecution(String),

    #[error("No route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
