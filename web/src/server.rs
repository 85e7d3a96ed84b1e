//! Listening socket lifecycle.
//!
//! [`acquire`] completes once the socket is bound and the serve loop is
//! running; [`ServerHandle::release`] stops accepting connections, lets
//! in-flight connections finish within the grace period, and waits for the
//! serve loop to exit. Connections still open when the grace period ends are
//! no longer waited for and the serve loop is aborted.

use crate::app::Application;
use crate::error::ServerError;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct HandleInner {
    local_addr: SocketAddr,
    grace: Duration,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<io::Result<()>>>>,
}

/// A running server. Cloning shares the same socket.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<HandleInner>,
}

/// Bind `host:port` and start serving `app`.
///
/// `grace` bounds how long [`ServerHandle::release`] waits for open
/// connections to finish.
///
/// # Errors
///
/// Returns [`ServerError::Listen`] if the address cannot be resolved or bound.
pub async fn acquire(
    app: &Application,
    host: &str,
    port: u16,
    grace: Duration,
) -> Result<ServerHandle, ServerError> {
    let addr = format!("{host}:{port}");
    let listen_error = |source| ServerError::Listen {
        addr: addr.clone(),
        source,
    };

    let listener = TcpListener::bind(&addr).await.map_err(listen_error)?;
    let local_addr = listener.local_addr().map_err(listen_error)?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let router = app.router();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                // A dropped sender also stops the server.
                let _ = shutdown_rx.await;
            })
            .await
    });

    tracing::info!(address = %local_addr, "HTTP server listening");
    metrics::counter!("http.server.started").increment(1);

    Ok(ServerHandle {
        inner: Arc::new(HandleInner {
            local_addr,
            grace,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: tokio::sync::Mutex::new(Some(task)),
        }),
    })
}

impl ServerHandle {
    /// The bound address (with the real port when `0` was requested).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Whether [`ServerHandle::release`] has been started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop the server and wait for the serve loop to finish.
    ///
    /// If connections are still open after the grace period, the serve loop
    /// is aborted, the listener dropped, and a warning logged.
    ///
    /// Releasing again, from this handle or a clone, returns `Ok(())` without
    /// doing anything.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Close`] if the serve loop failed or panicked.
    pub async fn release(&self) -> Result<(), ServerError> {
        if let Some(shutdown) = self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = shutdown.send(());
        }

        let Some(mut task) = self.inner.task.lock().await.take() else {
            tracing::debug!(address = %self.inner.local_addr, "HTTP server already closed");
            return Ok(());
        };

        let outcome = match tokio::time::timeout(self.inner.grace, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(io::Error::other(join.to_string())),
            Err(_) => {
                task.abort();
                let _ = task.await;
                tracing::warn!(
                    address = %self.inner.local_addr,
                    grace = ?self.inner.grace,
                    "Connections still open after grace period, serve loop aborted"
                );
                metrics::counter!("http.server.forced_close").increment(1);
                Ok(())
            }
        };

        outcome.map_err(|source| ServerError::Close {
            addr: self.inner.local_addr,
            source,
        })?;

        tracing::info!(address = %self.inner.local_addr, "HTTP server closed");
        Ok(())
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    const GRACE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_acquire_reports_real_port() {
        let handle = acquire(&Application::new(), "127.0.0.1", 0, GRACE).await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(!handle.is_closed());
        handle.release().await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_release_twice_is_a_no_op() {
        let handle = acquire(&Application::new(), "127.0.0.1", 0, GRACE).await.unwrap();
        let clone = handle.clone();
        handle.release().await.unwrap();
        clone.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_a_listen_error() {
        let first = acquire(&Application::new(), "127.0.0.1", 0, GRACE).await.unwrap();
        let port = first.local_addr().port();

        let err = acquire(&Application::new(), "127.0.0.1", port, GRACE)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Listen { ref addr, .. } if *addr == format!("127.0.0.1:{port}")));

        first.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_bounded_by_stalled_connection() {
        let handle = acquire(&Application::new(), "127.0.0.1", 0, Duration::from_millis(100))
            .await
            .unwrap();

        let mut stalled = TcpStream::connect(handle.local_addr()).await.unwrap();
        stalled
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let released = tokio::time::timeout(Duration::from_secs(5), handle.release()).await;
        assert!(matches!(released, Ok(Ok(()))));
        assert!(handle.is_closed());
        drop(stalled);
    }
}
