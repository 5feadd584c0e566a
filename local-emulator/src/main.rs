use config::Config;
use handlers::routes::{route, Emulator};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use loader::{DylibCache, HandlerLoader};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

mod config;
mod context;
mod error;
mod event;
mod handlers;
mod invoker;
mod loader;

use error::EmulatorError;

#[tokio::main]
async fn main() {
    // the config is needed to set the log level, so its errors are reported after the logger is up
    let config = Config::from_env();

    init_tracing(config.as_ref().map(|v| v.log_level.as_str()).unwrap_or("info"));

    let config = match config {
        Ok(v) => v,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

/// Binds to the configured port and serves requests until Ctrl-C.
async fn run(config: Config) -> Result<(), EmulatorError> {
    config.log_summary();

    let emulator = Arc::new(Emulator {
        loader: HandlerLoader::new(Arc::new(DylibCache::new(config.handlers_dir.clone()))),
        config,
    });

    // bind to a TCP port and start a loop to continuously accept incoming connections
    let listener = TcpListener::bind(emulator.config.listener).await?;

    info!(
        "Local emulator listening on http://{}\n- CORS enabled for {}\n- try http://localhost:{}/api/home\n",
        emulator.config.listener,
        emulator.config.frontend_url,
        emulator.config.listener.port()
    );

    loop {
        let (stream, client_address) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        };
        let io = TokioIo::new(stream);
        let emulator = Arc::clone(&emulator);

        // Spawn a tokio task to serve multiple connections concurrently
        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let emulator = Arc::clone(&emulator);
                async move { Ok::<_, hyper::Error>(route(emulator, req, Some(client_address)).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!("TCP error: {:?}", err);
            }
        });
    }
}

/// Initializes the tracing from RUST_LOG env var if present or sets minimal logging:
/// - `log_level` (LOG_LEVEL env var) for the emulator
/// - nothing for other crates
fn init_tracing(log_level: &str) {
    let directive = Directive::from_str(&["local_emulator=", log_level].concat()).unwrap_or_else(|_| {
        Directive::from_str("local_emulator=info").expect("Invalid logging filter. It's a bug.")
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().with_default_directive(directive).from_env_lossy())
        .with_ansi(true)
        .with_target(false)
        .compact()
        .init();
}
