use crate::error::EmulatorError;
use core::net::SocketAddrV4;
use std::env::var;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::info;
use url::Url;

const DEFAULT_PORT: &str = "3000";
const DEFAULT_ENVIRONMENT: &str = "development";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:4200";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HANDLERS_DIR: &str = "target/debug";

#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// E.g. 127.0.0.1:3000
    pub listener: SocketAddrV4,
    /// E.g. development or production
    pub environment: String,
    /// The only origin allowed to call the emulator from a browser, e.g. http://localhost:4200
    pub frontend_url: String,
    /// Tracing level for the emulator, e.g. info or debug
    pub log_level: String,
    /// Where the compiled handler libraries are, e.g. target/debug
    pub handlers_dir: PathBuf,
}

impl Config {
    /// Creates a new Config instance from environment variables and defaults.
    /// Values from `.env` in the working directory are loaded first, if the file exists.
    pub fn from_env() -> Result<Self, EmulatorError> {
        // a missing .env is normal, the defaults and the real env vars are enough
        let _ = dotenv::dotenv();

        Self::from_lookup(|name| var(name).ok())
    }

    /// Builds the config from any source of named values.
    /// Empty values are treated as not set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EmulatorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str, default: &str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        let port = get("PORT", DEFAULT_PORT);
        let port = match port.parse::<u32>() {
            Ok(v) if (1..=65535).contains(&v) => v as u16,
            _ => {
                return Err(EmulatorError::Configuration(format!(
                    "Invalid PORT: {port} (must be 1-65535)"
                )))
            }
        };

        let frontend_url = get("FRONTEND_URL", DEFAULT_FRONTEND_URL);
        if let Err(e) = Url::parse(&frontend_url) {
            return Err(EmulatorError::Configuration(format!(
                "Invalid FRONTEND_URL: {frontend_url} ({e})"
            )));
        }

        Ok(Self {
            listener: SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
            environment: get("APP_ENV", DEFAULT_ENVIRONMENT),
            // the browser sends the origin without a trailing slash
            frontend_url: frontend_url.trim_end_matches('/').to_owned(),
            log_level: get("LOG_LEVEL", DEFAULT_LOG_LEVEL),
            handlers_dir: PathBuf::from(get("HANDLERS_DIR", DEFAULT_HANDLERS_DIR)),
        })
    }

    /// Detailed error messages are only returned to the caller in development.
    pub fn is_development(&self) -> bool {
        self.environment == DEFAULT_ENVIRONMENT
    }

    pub fn log_summary(&self) {
        info!(
            "Configuration loaded:\n- port: {}\n- environment: {}\n- frontend URL: {}\n- handlers: {}",
            self.listener.port(),
            self.environment,
            self.frontend_url,
            self.handlers_dir.display()
        );
    }
}
