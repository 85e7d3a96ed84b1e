//! Error types for the web layer.
//!
//! - [`AppError`]: an HTTP error response body, used by the built-in replies
//!   (404 when no layer answers, 500 from the default exit handler, 503 while
//!   shutting down) and available to handlers through `Response::send_error`
//! - [`ServerError`]: fatal listen/close failures of the server lifecycle
//! - [`RegisterError`], [`BodyError`], [`ConfigError`]: setup and request-body failures

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// An HTTP error reply.
///
/// Renders as `{"code": ..., "message": ...}` with the given status. Unlike a
/// logged failure, building or sending an `AppError` has no side effects;
/// diagnostics belong to the exit handler.
///
/// # Examples
///
/// ```ignore
/// let users = handler(|env: Arc<Env>, req, res, _next| async move {
///     match req.json::<NewUser>().await {
///         Ok(user) => res.json(&env.users.insert(user).await),
///         Err(err) => res.send_error(AppError::from(err)),
///     };
/// });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
        }
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create the 404 sent when no registered layer handles a request.
    #[must_use]
    pub fn no_route(method: impl fmt::Display, path: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("Cannot {method} {path}"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Fatal failures of the server lifecycle.
///
/// There is no retry policy for a bad bind target, so a listen failure aborts
/// the whole server acquisition.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding or listening on the configured address failed
    #[error("Failed to listen on {addr}: {source}")]
    Listen {
        /// `host:port` as configured
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// The server reported an error while shutting down
    #[error("Failed to close server on {addr}: {source}")]
    Close {
        /// Address the server was bound to
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Errors registering handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// A registration call must carry at least one handler
    #[error("No handlers supplied for {target}")]
    NoHandlers {
        /// The verb and path (or mount point) being registered
        target: String,
    },
}

/// Errors reading a request body.
#[derive(Error, Debug)]
pub enum BodyError {
    /// An earlier layer already consumed the body
    #[error("Request body was already taken")]
    AlreadyTaken,

    /// Reading the body failed or exceeded the size limit
    #[error("Failed to read request body: {0}")]
    Read(#[from] axum::Error),

    /// The body was not valid JSON for the requested type
    #[error("Invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<BodyError> for AppError {
    fn from(err: BodyError) -> Self {
        Self::bad_request(err.to_string())
    }
}

/// Errors loading a [`ServerConfig`](crate::config::ServerConfig).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}
