//! Guarded resources.
//!
//! A [`Scope`] collects release actions as resources are acquired and runs
//! them in reverse order when it closes. Every release runs at most once, and
//! a failing release does not stop the ones registered before it.

use crate::error::ScopeError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

struct Finalizer {
    label: String,
    release: BoxFuture<'static, anyhow::Result<()>>,
}

/// A set of guarded resources released together.
///
/// Release is asynchronous, so it cannot run from `Drop`. Call
/// [`Scope::close`] (or use [`with_scope`]) on every exit path; dropping a scope
/// that still holds finalizers logs a warning.
#[derive(Default)]
pub struct Scope {
    finalizers: Vec<Finalizer>,
    closed: bool,
}

impl Scope {
    /// Create an empty, open scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a resource and register its release.
    ///
    /// The release is registered only if acquisition succeeds. It receives a
    /// reference to the resource and must produce an owned future, so
    /// resources are expected to be cheap handles.
    ///
    /// # Errors
    ///
    /// Returns the acquisition error unchanged; nothing is registered.
    pub async fn acquire_release<T, E, A, R, RF>(
        &mut self,
        label: impl Into<String>,
        acquire: A,
        release: R,
    ) -> Result<T, E>
    where
        A: Future<Output = Result<T, E>>,
        R: FnOnce(&T) -> RF,
        RF: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        let resource = acquire.await?;
        tracing::debug!(resource = %label, "Resource acquired");
        self.push(label, release(&resource).boxed());
        Ok(resource)
    }

    /// Register a release action that is not tied to an acquisition.
    pub fn add_finalizer<F>(&mut self, label: impl Into<String>, release: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push(label.into(), release.boxed());
    }

    fn push(&mut self, label: String, release: BoxFuture<'static, anyhow::Result<()>>) {
        if self.closed {
            tracing::warn!(resource = %label, "Finalizer registered on a closed scope, it will not run");
            return;
        }
        self.finalizers.push(Finalizer { label, release });
    }

    /// Number of pending finalizers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.finalizers.len()
    }

    /// Whether no finalizers are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.finalizers.is_empty()
    }

    /// Whether [`Scope::close`] has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run every finalizer, last registered first.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Release`] for the first finalizer that failed.
    /// Later failures are logged.
    pub async fn close(&mut self) -> Result<(), ScopeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        while let Some(Finalizer { label, release }) = self.finalizers.pop() {
            tracing::debug!(resource = %label, "Releasing resource");
            if let Err(source) = release.await {
                tracing::error!(resource = %label, error = %source, "Resource release failed");
                if first_error.is_none() {
                    first_error = Some(ScopeError::Release { label, source });
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if !self.closed && !self.finalizers.is_empty() {
            tracing::warn!(
                pending = self.finalizers.len(),
                "Scope dropped without close, resources were not released"
            );
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.finalizers.iter().map(|f| f.label.as_str()).collect();
        f.debug_struct("Scope")
            .field("finalizers", &labels)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Run `body` with a fresh scope and close it on every exit path.
///
/// A panic inside `body` is resumed after the scope has closed. If `body`
/// succeeds but closing fails, the close error is returned.
///
/// # Errors
///
/// Returns the body's error, or the scope's close error converted into `E`.
///
/// # Example
///
/// ```ignore
/// let addr = with_scope(|scope| Box::pin(async move {
///     let server = live("127.0.0.1", 0).build(scope).await?;
///     Ok::<_, anyhow::Error>(server.local_addr())
/// })).await?;
/// ```
pub async fn with_scope<T, E, F>(body: F) -> Result<T, E>
where
    F: for<'s> FnOnce(&'s mut Scope) -> BoxFuture<'s, Result<T, E>>,
    E: From<ScopeError>,
{
    let mut scope = Scope::new();
    let outcome = AssertUnwindSafe(body(&mut scope)).catch_unwind().await;
    let closed = scope.close().await;

    match outcome {
        Ok(result) => {
            let value = result?;
            closed?;
            Ok(value)
        },
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> BoxFuture<'static, anyhow::Result<()>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |label: &str| {
            let sink = Arc::clone(&sink);
            let label = label.to_string();
            async move {
                sink.lock().unwrap().push(label);
                Ok(())
            }
            .boxed()
        };
        (log, make)
    }

    #[tokio::test]
    async fn test_release_runs_in_reverse_order() {
        let (log, release) = recorder();
        let mut scope = Scope::new();

        let a = scope
            .acquire_release("a", async { Ok::<_, anyhow::Error>(1) }, |_| release("a"))
            .await
            .unwrap();
        let b = scope
            .acquire_release("b", async { Ok::<_, anyhow::Error>(2) }, |_| release("b"))
            .await
            .unwrap();
        scope.add_finalizer("c", release("c"));

        assert_eq!((a, b), (1, 2));
        assert_eq!(scope.len(), 3);

        scope.close().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
        assert!(scope.is_closed());
        assert!(scope.is_empty());
    }

    #[tokio::test]
    async fn test_failed_acquire_registers_nothing() {
        let (log, release) = recorder();
        let mut scope = Scope::new();

        let result = scope
            .acquire_release("a", async { Err::<u8, _>("bind failed") }, |_| release("a"))
            .await;

        assert_eq!(result, Err("bind failed"));
        assert!(scope.is_empty());
        scope.close().await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_release_does_not_stop_others() {
        let (log, release) = recorder();
        let mut scope = Scope::new();

        scope.add_finalizer("first", release("first"));
        scope.add_finalizer("broken", async { Err(anyhow::anyhow!("close failed")) });
        scope.add_finalizer("last", release("last"));

        let err = scope.close().await.unwrap_err();
        let ScopeError::Release { label, .. } = err;
        assert_eq!(label, "broken");
        assert_eq!(*log.lock().unwrap(), vec!["last", "first"]);
    }

    #[tokio::test]
    async fn test_close_twice_runs_finalizers_once() {
        let (log, release) = recorder();
        let mut scope = Scope::new();
        scope.add_finalizer("only", release("only"));

        scope.close().await.unwrap();
        scope.close().await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_with_scope_closes_on_error() {
        let (log, release) = recorder();

        let result: Result<(), anyhow::Error> = with_scope(|scope| {
            Box::pin(async move {
                scope.add_finalizer("guard", release("guard"));
                Err(anyhow::anyhow!("body failed"))
            })
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "body failed");
        assert_eq!(*log.lock().unwrap(), vec!["guard"]);
    }

    #[tokio::test]
    async fn test_with_scope_reports_close_failure() {
        let result: Result<u8, anyhow::Error> = with_scope(|scope| {
            Box::pin(async move {
                scope.add_finalizer("broken", async { Err(anyhow::anyhow!("nope")) });
                Ok(7)
            })
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("broken"));
    }
}
