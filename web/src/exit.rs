//! The policy applied when a handler terminates abnormally.

use crate::error::AppError;
use crate::next::Next;
use crate::request::Request;
use crate::response::Response;
use composable_http_core::Cause;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

type ExitFn = dyn Fn(Request, Response, Next, Cause) -> BoxFuture<'static, ()> + Send + Sync;

/// Invoked with the [`Cause`] when a handler dies or is interrupted.
///
/// The default logs the pretty-printed cause at error level when the handler
/// died (interruptions are not logged), then answers 500 unless the response
/// has already been sent. A status staged by the failed handler is discarded.
///
/// # Example
///
/// ```ignore
/// let exit = ExitHandler::new(|_req, res, _next, cause| async move {
///     if cause.is_die() {
///         res.status(StatusCode::BAD_GATEWAY).end();
///     } else {
///         res.send_status(StatusCode::SERVICE_UNAVAILABLE);
///     }
/// });
/// ```
#[derive(Clone)]
pub struct ExitHandler(Arc<ExitFn>);

impl ExitHandler {
    /// Wrap a custom exit policy.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Response, Next, Cause) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Arc::new(
            move |req: Request, res: Response, next: Next, cause: Cause| -> BoxFuture<'static, ()> {
                f(req, res, next, cause).boxed()
            },
        ))
    }

    /// Run the policy for one abnormal termination.
    pub fn call(
        &self,
        request: Request,
        response: Response,
        next: Next,
        cause: Cause,
    ) -> BoxFuture<'static, ()> {
        (self.0)(request, response, next, cause)
    }
}

impl Default for ExitHandler {
    fn default() -> Self {
        Self::new(default_exit)
    }
}

impl std::fmt::Debug for ExitHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExitHandler")
    }
}

async fn default_exit(request: Request, response: Response, _next: Next, cause: Cause) {
    if cause.is_die() {
        tracing::error!(
            correlation_id = %request.correlation_id(),
            method = %request.method(),
            path = %request.path(),
            "{}",
            cause.pretty()
        );
    }

    if !response.is_ended() {
        response.send_error(AppError::internal("Internal Server Error"));
    }
}
