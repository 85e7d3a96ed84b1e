//! The application handle: an ordered stack of routes and middleware.
//!
//! Layers are matched in registration order. A route layer matches when its
//! verb accepts the request method and its path matches the whole request
//! path; a mounted (middleware) layer matches any method on a path prefix.
//! Each layer holds one synchronous [`NativeHandler`]; a route registered with
//! several handlers becomes several consecutive layers.
//!
//! [`Application::router`] exposes the stack to Axum as a fallback service,
//! so Axum/Hyper own connections and framing while the stack owns dispatch.

use crate::error::{AppError, RegisterError};
use crate::middleware::correlation_id_layer;
use crate::next::Next;
use crate::request::Request;
use crate::response::Response;
use axum::response::IntoResponse;
use axum::Router;
use composable_http_core::{Params, PathSpec, Verb};
use http::Method;
use std::sync::{Arc, PoisonError, RwLock};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// A framework-native callback: synchronous, returns as soon as it has
/// scheduled its work.
pub type NativeHandler = Arc<dyn Fn(Request, Response, Next) + Send + Sync>;

#[derive(Debug, Clone)]
enum Matcher {
    Route(Verb),
    Mount,
}

/// One entry of the stack.
pub(crate) struct Layer {
    matcher: Matcher,
    path: PathSpec,
    handler: NativeHandler,
}

impl Layer {
    pub(crate) fn matches(&self, method: &Method, path: &str) -> Option<Params> {
        match self.matcher {
            Matcher::Route(verb) if verb.matches(method) => self.path.matches_route(path),
            Matcher::Route(_) => None,
            Matcher::Mount => self.path.matches_prefix(path),
        }
    }

    pub(crate) fn handler(&self) -> &NativeHandler {
        &self.handler
    }

    pub(crate) fn describe(&self) -> String {
        match self.matcher {
            Matcher::Route(verb) => format!("{verb} {}", self.path),
            Matcher::Mount => format!("USE {}", self.path),
        }
    }
}

/// Handle to the application stack.
///
/// Cloning shares the stack. Registration takes `&self`; layers added after
/// the server started listening apply to subsequent requests.
#[derive(Clone, Default)]
pub struct Application {
    stack: Arc<RwLock<Vec<Arc<Layer>>>>,
}

impl Application {
    /// Create an empty application. Never fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register native handlers for `verb` on `path`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::NoHandlers`] if `handlers` is empty.
    pub fn route(
        &self,
        verb: Verb,
        path: impl Into<PathSpec>,
        handlers: impl IntoIterator<Item = NativeHandler>,
    ) -> Result<(), RegisterError> {
        self.push(Matcher::Route(verb), path.into(), handlers)
    }

    /// Mount native middleware, optionally under a path prefix, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::NoHandlers`] if `handlers` is empty.
    pub fn mount(
        &self,
        path: Option<PathSpec>,
        handlers: impl IntoIterator<Item = NativeHandler>,
    ) -> Result<(), RegisterError> {
        self.push(Matcher::Mount, path.unwrap_or_else(PathSpec::root), handlers)
    }

    fn push(
        &self,
        matcher: Matcher,
        path: PathSpec,
        handlers: impl IntoIterator<Item = NativeHandler>,
    ) -> Result<(), RegisterError> {
        let layers: Vec<Arc<Layer>> = handlers
            .into_iter()
            .map(|handler| {
                Arc::new(Layer {
                    matcher: matcher.clone(),
                    path: path.clone(),
                    handler,
                })
            })
            .collect();

        let Some(first) = layers.first() else {
            let target = match matcher {
                Matcher::Route(verb) => format!("{verb} {path}"),
                Matcher::Mount => format!("USE {path}"),
            };
            return Err(RegisterError::NoHandlers { target });
        };

        tracing::debug!(layer = %first.describe(), handlers = layers.len(), "Registering layers");
        self.stack
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(layers);
        Ok(())
    }

    /// Number of registered layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<Layer>> {
        self.stack
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one request through the stack and wait for its reply.
    pub async fn dispatch(&self, request: axum::extract::Request) -> axum::response::Response {
        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, body);
        let (response, reply) = Response::channel();
        let method = request.method().clone();
        let path = request.path().to_string();

        Next::start(self.snapshot(), request, response).run();

        if let Ok(response) = reply.await {
            response
        } else {
            tracing::warn!(%method, %path, "Handler chain finished without a response");
            AppError::internal("Handler finished without a response").into_response()
        }
    }

    /// An Axum router that dispatches every request through this stack.
    ///
    /// The router carries request tracing and correlation IDs.
    #[must_use]
    pub fn router(&self) -> Router {
        let app = self.clone();

        Router::new()
            .fallback(move |request: axum::extract::Request| {
                let app = app.clone();
                async move { app.dispatch(request).await }
            })
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG))
                    // Handler failures are reported by the exit handler.
                    .on_failure(()),
            )
            .layer(correlation_id_layer())
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layers: Vec<String> = self.snapshot().iter().map(|l| l.describe()).collect();
        f.debug_struct("Application").field("layers", &layers).finish()
    }
}
