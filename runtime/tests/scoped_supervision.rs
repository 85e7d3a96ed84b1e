//! Scope and supervisor composed the way a server layer uses them.
//!
//! The resource is acquired first and the supervisor drain registered after it,
//! so closing the scope drains tasks while the resource is still available.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use composable_http_runtime::{with_scope, Scope, ScopeError, Supervisor, SupervisorError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// A stand-in for a listening socket: records whether it was still open
/// when each task observed its interruption.
#[derive(Clone, Default)]
struct Socket {
    open: Arc<AtomicBool>,
    seen_open_at_interrupt: Arc<Mutex<Vec<bool>>>,
}

#[tokio::test]
async fn test_drain_runs_before_resource_release() {
    init_tracing();
    let mut scope = Scope::new();
    let supervisor = Supervisor::new();

    let socket = assert_ok!(
        scope
            .acquire_release(
                "socket",
                async {
                    let socket = Socket::default();
                    socket.open.store(true, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(socket)
                },
                |socket: &Socket| {
                    let open = Arc::clone(&socket.open);
                    async move {
                        open.store(false, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .await
    );

    let drain = supervisor.clone();
    scope.add_finalizer("supervisor", async move {
        drain.shutdown(Duration::from_secs(5)).await?;
        Ok(())
    });

    for _ in 0..4 {
        let socket = socket.clone();
        assert!(supervisor.spawn(move |interrupt| async move {
            interrupt.interrupted().await;
            let open = socket.open.load(Ordering::SeqCst);
            socket.seen_open_at_interrupt.lock().unwrap().push(open);
        }));
    }

    assert_ok!(scope.close().await);

    assert_eq!(*socket.seen_open_at_interrupt.lock().unwrap(), vec![true; 4]);
    assert!(!socket.open.load(Ordering::SeqCst));
    assert_eq!(supervisor.active(), 0);
}

#[tokio::test]
async fn test_stuck_task_fails_drain_but_resource_still_released() {
    init_tracing();
    let released = Arc::new(AtomicBool::new(false));
    let supervisor = Supervisor::new();
    assert!(supervisor.spawn(|_| std::future::pending::<()>()));

    let flag = Arc::clone(&released);
    let drain = supervisor.clone();
    let result: Result<(), ScopeError> = with_scope(|scope| {
        Box::pin(async move {
            scope.add_finalizer("socket", async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
            scope.add_finalizer("supervisor", async move {
                drain.shutdown(Duration::from_millis(20)).await?;
                Ok(())
            });
            Ok(())
        })
    })
    .await;

    let ScopeError::Release { label, source } = assert_err!(result);
    assert_eq!(label, "supervisor");
    assert_eq!(
        source.downcast_ref::<SupervisorError>(),
        Some(&SupervisorError::ShutdownTimeout(1))
    );
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(supervisor.active(), 0);
}

#[tokio::test]
async fn test_late_spawn_during_teardown_is_rejected() {
    init_tracing();
    let supervisor = Supervisor::new();
    let mut scope = Scope::new();

    let drain = supervisor.clone();
    scope.add_finalizer("supervisor", async move {
        drain.shutdown(Duration::from_secs(1)).await?;
        Ok(())
    });
    assert_ok!(scope.close().await);

    assert!(!supervisor.is_open());
    assert!(!supervisor.spawn(|_| async {}));
}
