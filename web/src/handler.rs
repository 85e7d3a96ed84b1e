//! The handler adapter.
//!
//! An effect handler is an async function of `(env, request, response, next)`.
//! The framework only calls synchronous [`NativeHandler`]s, so every effect
//! handler is wrapped twice before it reaches the [`Application`]:
//!
//! 1. **Termination hook**: the handler future is raced against the
//!    supervisor's interruption signal and run under `catch_unwind`. A panic,
//!    an `Err` output, or an interruption becomes a [`Cause`] handed to the
//!    [`ExitHandler`].
//! 2. **Native adapter**: the hooked future is spawned on the [`Supervisor`]
//!    and the native callback returns immediately.
//!
//! The environment, supervisor and exit handler are captured once, when a
//! [`Runtime`] is built, and shared by every request of every route it registers.

use crate::app::{Application, NativeHandler};
use crate::error::{AppError, RegisterError};
use crate::exit::ExitHandler;
use crate::next::Next;
use crate::request::Request;
use crate::response::Response;
use composable_http_core::{Cause, Defect, HandlerOutput, PathSpec, Verb};
use composable_http_runtime::{Interrupt, Supervisor};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// An effectful request handler.
///
/// Implemented for every `Fn(Arc<Env>, Request, Response, Next) -> Fut` whose
/// future is `Send + 'static` and resolves to `()` or `Result<(), E>`.
pub trait EffectHandler<Env>: Send + Sync + 'static {
    /// Start the handler. `None` means it completed normally.
    fn call(
        &self,
        env: Arc<Env>,
        request: Request,
        response: Response,
        next: Next,
    ) -> BoxFuture<'static, Option<Cause>>;
}

impl<Env, F, Fut> EffectHandler<Env> for F
where
    Env: Send + Sync + 'static,
    F: Fn(Arc<Env>, Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    fn call(
        &self,
        env: Arc<Env>,
        request: Request,
        response: Response,
        next: Next,
    ) -> BoxFuture<'static, Option<Cause>> {
        let fut = (self)(env, request, response, next);
        async move { fut.await.into_cause() }.boxed()
    }
}

/// A type-erased effect handler.
pub type BoxedHandler<Env> = Arc<dyn EffectHandler<Env>>;

/// Box an async closure as an effect handler.
///
/// ```ignore
/// let hello = handler(|env: Arc<Env>, _req, res: Response, _next| async move {
///     res.json(&serde_json::json!({ "message": env.greeting }));
/// });
/// ```
pub fn handler<Env, F, Fut>(f: F) -> BoxedHandler<Env>
where
    Env: Send + Sync + 'static,
    F: Fn(Arc<Env>, Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    Arc::new(f)
}

/// Lift a synchronous native-style callback into an effect handler.
///
/// The callback runs inside the supervised task with no other change in behavior.
pub fn classic<Env, F>(f: F) -> BoxedHandler<Env>
where
    Env: Send + Sync + 'static,
    F: Fn(Request, Response, Next) + Send + Sync + 'static,
{
    handler(move |_env: Arc<Env>, request, response, next| {
        f(request, response, next);
        future::ready(())
    })
}

/// Argument of [`Runtime::use_`]: middleware for every path, or under a prefix.
pub enum Mount<Env> {
    /// Runs for every request.
    Global(Vec<BoxedHandler<Env>>),
    /// Runs for requests whose path starts with the given prefix.
    At(PathSpec, Vec<BoxedHandler<Env>>),
}

impl<Env> From<Vec<BoxedHandler<Env>>> for Mount<Env> {
    fn from(handlers: Vec<BoxedHandler<Env>>) -> Self {
        Self::Global(handlers)
    }
}

impl<Env> From<BoxedHandler<Env>> for Mount<Env> {
    fn from(handler: BoxedHandler<Env>) -> Self {
        Self::Global(vec![handler])
    }
}

impl<Env, P> From<(P, Vec<BoxedHandler<Env>>)> for Mount<Env>
where
    P: Into<PathSpec>,
{
    fn from((path, handlers): (P, Vec<BoxedHandler<Env>>)) -> Self {
        Self::At(path.into(), handlers)
    }
}

/// Registration surface for effect handlers.
///
/// Holds the context every registered handler runs with: the shared
/// environment, the supervisor its tasks are spawned on, and the exit handler.
pub struct Runtime<Env> {
    app: Application,
    supervisor: Supervisor,
    env: Arc<Env>,
    exit: ExitHandler,
}

impl<Env> Clone for Runtime<Env> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            supervisor: self.supervisor.clone(),
            env: Arc::clone(&self.env),
            exit: self.exit.clone(),
        }
    }
}

impl<Env> std::fmt::Debug for Runtime<Env> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("app", &self.app)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl<Env: Send + Sync + 'static> Runtime<Env> {
    /// Capture a registration context.
    pub fn new(app: Application, supervisor: Supervisor, env: Arc<Env>, exit: ExitHandler) -> Self {
        Self {
            app,
            supervisor,
            env,
            exit,
        }
    }

    /// The environment handed to every handler.
    #[must_use]
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// The application handlers are registered on.
    #[must_use]
    pub fn app(&self) -> &Application {
        &self.app
    }

    /// Register `handlers` for `verb` on `path`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::NoHandlers`] if `handlers` is empty.
    pub fn route(
        &self,
        verb: Verb,
        path: impl Into<PathSpec>,
        handlers: impl IntoIterator<Item = BoxedHandler<Env>>,
    ) -> Result<(), RegisterError> {
        let native: Vec<NativeHandler> = handlers.into_iter().map(|h| self.adapt(h)).collect();
        self.app.route(verb, path, native)
    }

    /// Register middleware, globally or under a path prefix.
    ///
    /// ```ignore
    /// runtime.use_(vec![auth.clone()])?;
    /// runtime.use_(("/admin", vec![audit]))?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::NoHandlers`] if the group is empty.
    pub fn use_(&self, mount: impl Into<Mount<Env>>) -> Result<(), RegisterError> {
        let (path, handlers) = match mount.into() {
            Mount::Global(handlers) => (None, handlers),
            Mount::At(path, handlers) => (Some(path), handlers),
        };
        let native: Vec<NativeHandler> = handlers.into_iter().map(|h| self.adapt(h)).collect();
        self.app.mount(path, native)
    }

    /// Register middleware under a path prefix.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::NoHandlers`] if `handlers` is empty.
    pub fn use_at(
        &self,
        path: impl Into<PathSpec>,
        handlers: impl IntoIterator<Item = BoxedHandler<Env>>,
    ) -> Result<(), RegisterError> {
        self.use_(Mount::At(path.into(), handlers.into_iter().collect()))
    }

    fn adapt(&self, handler: BoxedHandler<Env>) -> NativeHandler {
        let supervisor = self.supervisor.clone();
        let env = Arc::clone(&self.env);
        let exit = self.exit.clone();

        Arc::new(move |request: Request, response: Response, next: Next| {
            let span = tracing::debug_span!(
                "handler",
                correlation_id = %request.correlation_id(),
                method = %request.method(),
                path = %request.path(),
            );
            let rejected = response.clone();
            let handler = Arc::clone(&handler);
            let env = Arc::clone(&env);
            let exit = exit.clone();

            let scheduled = supervisor.spawn(move |interrupt| {
                guarded(handler, env, exit, interrupt, request, response, next).instrument(span)
            });

            if !scheduled {
                rejected.send_error(AppError::unavailable("Server is shutting down"));
            }
        })
    }
}

async fn guarded<Env>(
    handler: BoxedHandler<Env>,
    env: Arc<Env>,
    exit: ExitHandler,
    interrupt: Interrupt,
    request: Request,
    response: Response,
    next: Next,
) where
    Env: Send + Sync + 'static,
{
    let run = AssertUnwindSafe(async {
        handler
            .call(env, request.clone(), response.clone(), next.clone())
            .await
    })
    .catch_unwind();

    let outcome = tokio::select! {
        biased;
        () = interrupt.interrupted() => Some(Cause::Interrupt),
        result = run => match result {
            Ok(cause) => cause,
            Err(payload) => Some(Cause::Die(Defect::from_panic(payload.as_ref()))),
        },
    };

    let Some(cause) = outcome else {
        return;
    };

    if cause.is_die() {
        metrics::counter!("handler.defects").increment(1);
    } else {
        metrics::counter!("handler.interrupted").increment(1);
    }

    let report = AssertUnwindSafe(async { exit.call(request, response.clone(), next, cause).await })
        .catch_unwind()
        .await;

    if let Err(payload) = report {
        tracing::error!(
            defect = %Defect::from_panic(payload.as_ref()),
            "Exit handler panicked"
        );
        if !response.is_ended() {
            response.send_error(AppError::internal("Internal Server Error"));
        }
    }
}

macro_rules! verb_methods {
    ($($name:ident => $verb:ident),* $(,)?) => {
        impl<Env: Send + Sync + 'static> Runtime<Env> {
            $(
                #[doc = concat!("Register handlers for `", stringify!($verb), "` requests on `path`.")]
                ///
                /// # Errors
                ///
                /// Returns [`RegisterError::NoHandlers`] if `handlers` is empty.
                pub fn $name(
                    &self,
                    path: impl Into<PathSpec>,
                    handlers: impl IntoIterator<Item = BoxedHandler<Env>>,
                ) -> Result<(), RegisterError> {
                    self.route(Verb::$verb, path, handlers)
                }
            )*
        }
    };
}

verb_methods! {
    all => All,
    get => Get,
    post => Post,
    put => Put,
    delete => Delete,
    patch => Patch,
    options => Options,
    head => Head,
    checkout => Checkout,
    connect => Connect,
    copy => Copy,
    lock => Lock,
    merge => Merge,
    mkactivity => MkActivity,
    mkcol => MkCol,
    move_ => Move,
    m_search => MSearch,
    notify => Notify,
    propfind => PropFind,
    proppatch => PropPatch,
    purge => Purge,
    report => Report,
    search => Search,
    subscribe => Subscribe,
    trace => Trace,
    unlock => Unlock,
    unsubscribe => Unsubscribe,
}
