//! # Composable HTTP Runtime
//!
//! Runtime pieces that give handler effects a lifetime.
//!
//! ## Core Components
//!
//! - **Scope**: guarded resources whose release runs exactly once, in reverse
//!   order of acquisition
//! - **Supervisor**: tracks every task spawned on behalf of a scope and
//!   interrupts the survivors when the scope ends
//!
//! ## Example
//!
//! ```ignore
//! use composable_http_runtime::{Scope, Supervisor};
//! use std::time::Duration;
//!
//! let mut scope = Scope::new();
//! let supervisor = Supervisor::new();
//!
//! let drain = supervisor.clone();
//! scope.add_finalizer("supervisor", async move {
//!     drain.shutdown(Duration::from_secs(5)).await?;
//!     Ok(())
//! });
//!
//! supervisor.spawn(|interrupt| async move {
//!     interrupt.interrupted().await;
//! });
//!
//! scope.close().await?;
//! ```

/// Guarded resources with reverse-order release
pub mod scope;

/// Supervision of spawned handler tasks
pub mod supervisor;

/// Error types for the runtime
pub mod error {
    use thiserror::Error;

    /// Errors raised while closing a [`Scope`](crate::Scope).
    #[derive(Error, Debug)]
    pub enum ScopeError {
        /// A finalizer failed
        ///
        /// Remaining finalizers still ran; this is the first failure observed.
        #[error("Release of {label} failed: {source}")]
        Release {
            /// Label given when the finalizer was registered
            label: String,
            /// Underlying failure
            #[source]
            source: anyhow::Error,
        },
    }

    /// Errors from [`Supervisor`](crate::Supervisor) operations.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum SupervisorError {
        /// Tasks ignored interruption and were aborted after the timeout
        #[error("Supervisor shutdown timed out with {0} tasks still running")]
        ShutdownTimeout(usize),
    }
}

pub use error::{ScopeError, SupervisorError};
pub use scope::{with_scope, Scope};
pub use supervisor::{Interrupt, Supervisor};
