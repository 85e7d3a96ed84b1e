//! Composition surface: one call that provisions the whole server.
//!
//! Building a [`ServerLayer`] inside a [`Scope`] acquires, in order:
//!
//! 1. the [`Application`]
//! 2. the [`Supervisor`]
//! 3. the listening socket, released by closing the server
//! 4. the supervisor drain
//!
//! Closing the scope runs the releases in reverse, so in-flight handlers are
//! interrupted and awaited while the socket can still deliver their replies,
//! and the socket closes last.
//!
//! # Example
//!
//! ```ignore
//! let mut scope = Scope::new();
//! let server = live("127.0.0.1", 3000).build(&mut scope).await?;
//!
//! let rt = server.runtime(Arc::new(Env::default()));
//! rt.get("/", vec![hello])?;
//!
//! tokio::signal::ctrl_c().await?;
//! scope.close().await?;
//! ```

use crate::app::Application;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::exit::ExitHandler;
use crate::handler::Runtime;
use crate::server::{self, ServerHandle};
use composable_http_runtime::{Scope, Supervisor};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A server layer listening on `host:port` with the default exit handler.
#[must_use]
pub fn live(host: impl Into<String>, port: u16) -> ServerLayer {
    ServerLayer::new(ServerConfig::new(host, port))
}

/// Everything needed to provision a server, not yet acquired.
#[derive(Debug, Clone)]
pub struct ServerLayer {
    config: ServerConfig,
}

impl ServerLayer {
    /// Wrap an explicit configuration.
    #[must_use]
    pub const fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Replace the exit handler.
    #[must_use]
    pub fn with_exit_handler(mut self, exit_handler: ExitHandler) -> Self {
        self.config = self.config.with_exit_handler(exit_handler);
        self
    }

    /// Replace the shutdown grace period, applied both to draining handlers and
    /// to closing open connections.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_shutdown_timeout(timeout);
        self
    }

    /// The configuration this layer provisions.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Acquire the application, supervisor and socket inside `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listen`] if the socket cannot be bound. Nothing
    /// is registered in `scope` in that case.
    pub async fn build(self, scope: &mut Scope) -> Result<Server, ServerError> {
        let app = Application::new();
        let supervisor = Supervisor::new();

        let handle = scope
            .acquire_release(
                "http-server",
                server::acquire(
                    &app,
                    &self.config.host,
                    self.config.port,
                    self.config.shutdown_timeout,
                ),
                |handle: &ServerHandle| {
                    let handle = handle.clone();
                    async move { handle.release().await.map_err(anyhow::Error::from) }
                },
            )
            .await?;

        let drain = supervisor.clone();
        let timeout = self.config.shutdown_timeout;
        scope.add_finalizer("supervisor", async move {
            drain.shutdown(timeout).await?;
            Ok(())
        });

        Ok(Server {
            app,
            supervisor,
            handle,
            config: Arc::new(self.config),
        })
    }
}

/// The provisioned server: the context handlers are registered against.
#[derive(Debug, Clone)]
pub struct Server {
    app: Application,
    supervisor: Supervisor,
    handle: ServerHandle,
    config: Arc<ServerConfig>,
}

impl Server {
    /// The application stack.
    #[must_use]
    pub const fn app(&self) -> &Application {
        &self.app
    }

    /// The supervisor handler tasks run under.
    #[must_use]
    pub const fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// The listening socket.
    #[must_use]
    pub const fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// The configuration the server was built from.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A registration context whose handlers receive `env`.
    #[must_use]
    pub fn runtime<Env>(&self, env: Arc<Env>) -> Runtime<Env>
    where
        Env: Send + Sync + 'static,
    {
        Runtime::new(
            self.app.clone(),
            self.supervisor.clone(),
            env,
            self.config.exit_handler.clone(),
        )
    }

    /// Run `f` against the application, typically to register native handlers.
    pub fn with_app<T>(&self, f: impl FnOnce(&Application) -> T) -> T {
        f(&self.app)
    }
}
