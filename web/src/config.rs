//! Server configuration.
//!
//! Built once at composition time and immutable afterwards. Values come from
//! the builder methods or from the environment:
//!
//! | Variable                     | Default     |
//! |------------------------------|-------------|
//! | `HTTP_HOST`                  | `127.0.0.1` |
//! | `HTTP_PORT`                  | `3000`      |
//! | `HTTP_SHUTDOWN_TIMEOUT_SECS` | `30`        |

use crate::error::ConfigError;
use crate::exit::ExitHandler;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 3000;

/// How long teardown waits for in-flight handlers before aborting them.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Where to listen and how to treat abnormal handler termination.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to (`0` picks a free port)
    pub port: u16,
    /// Grace period for in-flight handlers at shutdown
    pub shutdown_timeout: Duration,
    /// Policy for handlers that die or are interrupted
    pub exit_handler: ExitHandler,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            exit_handler: ExitHandler::default(),
        }
    }
}

impl ServerConfig {
    /// Configuration for `host:port` with the default exit handler.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Replace the exit handler.
    #[must_use]
    pub fn with_exit_handler(mut self, exit_handler: ExitHandler) -> Self {
        self.exit_handler = exit_handler;
        self
    }

    /// Replace the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// `host:port` as passed to the listener.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load configuration from the process environment.
    ///
    /// Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HTTP_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse(&lookup, "HTTP_PORT")?.unwrap_or(DEFAULT_PORT);
        let shutdown_timeout = parse(&lookup, "HTTP_SHUTDOWN_TIMEOUT_SECS")?
            .map_or(DEFAULT_SHUTDOWN_TIMEOUT, Duration::from_secs);

        Ok(Self {
            host,
            port,
            shutdown_timeout,
            exit_handler: ExitHandler::default(),
        })
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        })
        .transpose()
}
