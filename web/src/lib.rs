//! Effectful handlers on top of Axum.
//!
//! Handlers are async functions of `(env, request, response, next)`. They are
//! registered on an ordered stack (routes and middleware, matched in
//! registration order, Express style), and every invocation runs as a task on
//! a [`Supervisor`](composable_http_runtime::Supervisor) scoped to the server's
//! lifetime. Abnormal termination (a panic, an `Err`, or an interruption at
//! shutdown) is routed to a single [`ExitHandler`].
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  Axum / Hyper                              │  ← sockets, framing, keep-alive
//! │  TraceLayer + correlation IDs              │
//! ├────────────────────────────────────────────┤
//! │  Application stack (fallback service)      │  ← ordered layers, Next
//! ├────────────────────────────────────────────┤
//! │  Handler adapter                           │  ← spawn on Supervisor,
//! │                                            │    catch panics, race interrupt
//! ├────────────────────────────────────────────┤
//! │  Your handlers (Arc<Env>, Request, ...)    │
//! └────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use composable_http_runtime::Scope;
//! use composable_http_web::{handler, live, Request, Response};
//! use std::sync::Arc;
//!
//! struct Env { greeting: String }
//!
//! let mut scope = Scope::new();
//! let server = live("127.0.0.1", 3000).build(&mut scope).await?;
//! let rt = server.runtime(Arc::new(Env { greeting: "ok".into() }));
//!
//! rt.get("/", vec![handler(|env: Arc<Env>, _req: Request, res: Response, _next| async move {
//!     res.json(&serde_json::json!({ "message": env.greeting }));
//! })])?;
//!
//! tokio::signal::ctrl_c().await?;
//! scope.close().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod config;
pub mod error;
pub mod exit;
pub mod handler;
pub mod layer;
pub mod middleware;
pub mod next;
pub mod request;
pub mod response;
pub mod server;

// Re-export key types for convenience
pub use app::{Application, NativeHandler};
pub use config::ServerConfig;
pub use error::{AppError, BodyError, ConfigError, RegisterError, ServerError};
pub use exit::ExitHandler;
pub use handler::{classic, handler, BoxedHandler, EffectHandler, Mount, Runtime};
pub use layer::{live, Server, ServerLayer};
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};
pub use next::Next;
pub use request::Request;
pub use response::Response;
pub use server::{acquire, ServerHandle};
