//! Supervision of concurrently running handler tasks.
//!
//! Every task is spawned on the ambient tokio runtime and tracked until it
//! finishes. [`Supervisor::shutdown`] closes the supervisor to new work,
//! signals an [`Interrupt`] to every tracked task, and waits for them all.

use crate::error::SupervisorError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;

struct Inner {
    open: AtomicBool,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, AbortHandle>>,
    interrupt: watch::Sender<bool>,
    idle: watch::Sender<()>,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a task from the tracked set when its future completes or is dropped.
struct TaskGuard {
    id: u64,
    inner: Arc<Inner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut tasks = self.inner.tasks();
        tasks.remove(&self.id);
        if tasks.is_empty() {
            self.inner.idle.send_replace(());
        }
    }
}

/// Interruption signal handed to each supervised task.
#[derive(Clone, Debug)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    /// Whether the supervisor has started shutting down.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the supervisor interrupts its tasks.
    pub async fn interrupted(&self) {
        let mut rx = self.rx.clone();
        // A dropped sender means the supervisor is gone, which is an interruption too.
        let _ = rx.wait_for(|interrupted| *interrupted).await;
    }
}

/// Registry of tasks whose lifetime is bounded by a server scope.
///
/// Cloning shares the registry.
///
/// # Example
///
/// ```ignore
/// let supervisor = Supervisor::new();
///
/// supervisor.spawn(|interrupt| async move {
///     tokio::select! {
///         () = interrupt.interrupted() => tracing::info!("cancelled"),
///         () = do_work() => {}
///     }
/// });
///
/// supervisor.shutdown(Duration::from_secs(5)).await?;
/// ```
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Create an open supervisor with no tasks.
    #[must_use]
    pub fn new() -> Self {
        let (interrupt, _) = watch::channel(false);
        let (idle, _) = watch::channel(());

        Self {
            inner: Arc::new(Inner {
                open: AtomicBool::new(true),
                next_id: AtomicU64::new(0),
                tasks: Mutex::new(HashMap::new()),
                interrupt,
                idle,
            }),
        }
    }

    /// Whether new tasks are accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.tasks().len()
    }

    /// An interruption handle tied to this supervisor.
    #[must_use]
    pub fn interrupt(&self) -> Interrupt {
        Interrupt {
            rx: self.inner.interrupt.subscribe(),
        }
    }

    /// Spawn a tracked task and return immediately.
    ///
    /// `task` receives the [`Interrupt`] it should observe. Once the supervisor
    /// has begun shutting down the task is dropped without running and `false`
    /// is returned.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(Interrupt) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.is_open() {
            tracing::debug!("Supervisor closed, task dropped");
            metrics::counter!("supervisor.tasks.rejected").increment(1);
            return false;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let fut = task(self.interrupt());
        let guard = TaskGuard {
            id,
            inner: Arc::clone(&self.inner),
        };

        // Holding the lock across spawn + insert orders the guard's removal after
        // the insertion, and orders this check against `shutdown` closing the gate.
        let mut tasks = self.inner.tasks();
        if !self.inner.open.load(Ordering::Acquire) {
            drop(tasks);
            drop(guard);
            tracing::debug!("Supervisor closed while spawning, task dropped");
            metrics::counter!("supervisor.tasks.rejected").increment(1);
            return false;
        }

        let handle = tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
        tasks.insert(id, handle.abort_handle());
        drop(tasks);

        tracing::trace!(task_id = id, "Supervised task spawned");
        metrics::counter!("supervisor.tasks.spawned").increment(1);
        true
    }

    /// Wait until no tracked task is running.
    pub async fn idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        while self.active() > 0 {
            if idle.changed().await.is_err() {
                break;
            }
        }
    }

    /// Close the supervisor, interrupt all tasks, and wait for them to finish.
    ///
    /// Tasks that are still running after `timeout` are aborted. Calling this
    /// again after it has completed is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::ShutdownTimeout`] if tasks had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SupervisorError> {
        let pending = {
            let tasks = self.inner.tasks();
            self.inner.open.store(false, Ordering::Release);
            tasks.len()
        };

        tracing::info!(pending_tasks = pending, "Shutting down supervisor");
        self.inner.interrupt.send_replace(true);
        if pending > 0 {
            metrics::counter!("supervisor.tasks.interrupted").increment(pending as u64);
        }

        if tokio::time::timeout(timeout, self.idle()).await.is_ok() {
            tracing::info!("All supervised tasks finished");
            return Ok(());
        }

        let aborted = {
            let tasks = self.inner.tasks();
            for handle in tasks.values() {
                handle.abort();
            }
            tasks.len()
        };
        tracing::error!(
            aborted_tasks = aborted,
            "Supervised tasks ignored interruption, aborting"
        );
        metrics::counter!("supervisor.shutdown.timeout").increment(1);
        self.idle().await;

        Err(SupervisorError::ShutdownTimeout(aborted))
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("open", &self.is_open())
            .field("active", &self.active())
            .finish()
    }
}
